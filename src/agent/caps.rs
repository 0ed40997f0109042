//! Per-request entitlements.
//!
//! `Caps` is computed by the caller from the user's plan before a request is
//! handled; the orchestrator only reads it.

use serde::{Deserialize, Serialize};

use crate::tools::starter_whitelist;

/// Limits applied to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caps {
    /// Output token ceiling; the configured default applies when unset
    pub max_tokens: Option<u32>,
    /// Images accepted from the request
    pub max_images: usize,
    /// Tools exposed to the model; `None` exposes every registered tool
    pub tool_whitelist: Option<Vec<String>>,
    /// Specialty whose prompt is injected, if any
    pub specialty_code: Option<String>,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_images: usize::MAX,
            tool_whitelist: None,
            specialty_code: None,
        }
    }
}

impl Caps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }

    pub fn with_tool_whitelist(mut self, tools: Vec<String>) -> Self {
        self.tool_whitelist = Some(tools);
        self
    }

    pub fn with_specialty(mut self, code: &str) -> Self {
        self.specialty_code = Some(code.to_string());
        self
    }

    /// Derive caps from a subscription plan.
    ///
    /// # Example
    /// ```
    /// use medchat::agent::{Caps, Plan};
    ///
    /// let plan = Plan {
    ///     code: "starter".into(),
    ///     max_tokens_per_request: 800,
    ///     allow_vision: false,
    ///     max_images: 2,
    ///     allow_agent_tools: true,
    ///     specialties: vec!["cardiology".into()],
    /// };
    /// let caps = Caps::from_plan(&plan, Some("dermatology"));
    /// assert_eq!(caps.max_images, 0);
    /// assert_eq!(caps.tool_whitelist.unwrap().len(), 3);
    /// assert!(caps.specialty_code.is_none());
    /// ```
    pub fn from_plan(plan: &Plan, requested_specialty: Option<&str>) -> Self {
        let tool_whitelist = if !plan.allow_agent_tools {
            Some(Vec::new())
        } else if plan.code == "starter" {
            Some(starter_whitelist())
        } else {
            None
        };

        Self {
            max_tokens: Some(plan.max_tokens_per_request),
            max_images: if plan.allow_vision { plan.max_images } else { 0 },
            tool_whitelist,
            specialty_code: requested_specialty
                .filter(|code| plan.specialties.iter().any(|s| s == code))
                .map(str::to_string),
        }
    }
}

/// The plan attributes that shape [`Caps`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    pub max_tokens_per_request: u32,
    pub allow_vision: bool,
    pub max_images: usize,
    pub allow_agent_tools: bool,
    /// Specialty codes the plan may inject
    pub specialties: Vec<String>,
}
