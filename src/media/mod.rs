//! Media handling for user photos
//!
//! [`budget`] shrinks a single image into a resolution and byte envelope;
//! [`input`] turns the images attached to a request into the multipart
//! content of the user turn.

pub mod budget;
pub mod input;

pub use budget::{BudgetedImage, ImageBudget, ImageBudgeter, JPEG_MIME};
pub use input::{build_user_content, data_url, guess_mime, ImageInput};
