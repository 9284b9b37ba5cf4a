//! Template-based drafter.
//!
//! Fills `{first_name}`, `{company}`, `{role}`, `{email}`, and `{linkedin}`
//! placeholders from the recipient. Unknown placeholders are left as-is.

use async_trait::async_trait;

use super::collaborators::{Draft, DraftError, Drafter, Recipient};
use crate::config::DraftingConfig;

pub struct TemplateDrafter {
    template_id: String,
    subject: String,
    body: String,
    attachment: Option<String>,
}

impl TemplateDrafter {
    pub fn new(config: &DraftingConfig) -> Self {
        Self {
            template_id: config.template_id.clone(),
            subject: config.subject.clone(),
            body: config.body.clone(),
            attachment: config.attachment.clone(),
        }
    }

    fn render(&self, template: &str, recipient: &Recipient) -> Result<String, DraftError> {
        let mut out = template.to_string();
        let fields = [
            ("{first_name}", recipient.first_name.as_str()),
            ("{company}", recipient.company.as_str()),
            ("{role}", recipient.role.as_str()),
            ("{email}", recipient.email.as_str()),
        ];

        for (placeholder, value) in fields {
            if !out.contains(placeholder) {
                continue;
            }
            if value.trim().is_empty() {
                return Err(DraftError::MissingField(
                    placeholder.trim_matches(|c| c == '{' || c == '}').to_string(),
                ));
            }
            out = out.replace(placeholder, value.trim());
        }

        if out.contains("{linkedin}") {
            out = out.replace("{linkedin}", recipient.linkedin.as_deref().unwrap_or(""));
        }

        Ok(out)
    }
}

#[async_trait]
impl Drafter for TemplateDrafter {
    async fn draft(&self, recipient: &Recipient) -> Result<Draft, DraftError> {
        Ok(Draft {
            subject: self.render(&self.subject, recipient)?,
            body: self.render(&self.body, recipient)?,
            template_id: self.template_id.clone(),
            attachment: self.attachment.clone(),
        })
    }
}
