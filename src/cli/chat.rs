//! Chat command handler (one-shot + interactive mode).

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

use medchat::agent::{Caps, Orchestrator, RespondRequest};
use medchat::config::Config;
use medchat::media::ImageInput;

use super::common::{create_provider, open_store};
use super::ChatArgs;

/// Send one message, or read messages from stdin until EOF / `exit`.
pub(crate) async fn cmd_chat(config: Config, args: ChatArgs) -> Result<()> {
    let store = open_store(&config).await?;
    let provider = create_provider(&config);
    let orchestrator = Orchestrator::from_store(store, provider, &config);

    let images = load_images(&args.images).await?;
    let caps = caps_from_args(&args);

    if let Some(message) = args.message.as_deref() {
        let reply = orchestrator
            .respond(request(&args, caps, message, images, args.new))
            .await;
        println!("{}", reply.answer);
        return Ok(());
    }

    println!("MedChat (user {})", args.user);
    println!("Type your message and press Enter. Type 'quit' or 'exit' to stop.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    // Images and --new only apply to the first message of the session.
    let mut pending_images = Some(images);
    let mut new_conversation = args.new;

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }

                let images = pending_images.take().unwrap_or_default();
                let reply = orchestrator
                    .respond(request(&args, caps.clone(), input, images, new_conversation))
                    .await;
                new_conversation = false;

                println!();
                println!("{}", reply.answer);
                println!();
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn request(
    args: &ChatArgs,
    caps: Caps,
    message: &str,
    images: Vec<ImageInput>,
    new_conversation: bool,
) -> RespondRequest {
    let mut request = RespondRequest::new(args.user)
        .with_message(message)
        .with_images(images)
        .with_caps(caps);
    if new_conversation {
        request = request.with_new_conversation();
    }
    if let Some(model) = args.model.as_deref() {
        request = request.with_model(model);
    }
    request
}

fn caps_from_args(args: &ChatArgs) -> Caps {
    let mut caps = Caps::new();
    if let Some(max_tokens) = args.max_tokens {
        caps = caps.with_max_tokens(max_tokens);
    }
    if let Some(max_images) = args.max_images {
        caps = caps.with_max_images(max_images);
    }
    if let Some(tools) = args.tools.clone() {
        caps = caps.with_tool_whitelist(tools);
    }
    if let Some(specialty) = args.specialty.as_deref() {
        caps = caps.with_specialty(specialty);
    }
    caps
}

/// Existing files are read from disk; anything else is a URL or base64 payload.
async fn load_images(references: &[String]) -> Result<Vec<ImageInput>> {
    let mut images = Vec::with_capacity(references.len());
    for reference in references {
        let path = Path::new(reference);
        if path.is_file() {
            let image = ImageInput::from_path(path)
                .await
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            images.push(image);
        } else {
            images.push(ImageInput::from_reference(reference));
        }
    }
    Ok(images)
}
