//! Prompt construction for reasoning calls.

use async_trait::async_trait;

use super::evaluator::EvalResult;
use super::value::StructType;

#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn generate_prompt(
        &self,
        user_content: String,
        expected: Option<&StructType>,
        meta: PromptMeta,
    ) -> EvalResult<Prompt>;
}

#[derive(Debug)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub struct PromptMeta {
    pub script_name: String,
    /// Declared type name at the call site, when it is not a struct.
    pub expected_type: Option<String>,
}

pub struct StandardPromptGenerator;

#[async_trait]
impl PromptGenerator for StandardPromptGenerator {
    async fn generate_prompt(
        &self,
        user_content: String,
        expected: Option<&StructType>,
        meta: PromptMeta,
    ) -> EvalResult<Prompt> {
        let mut system = format!("You are the reasoning engine for '{}'.\n", meta.script_name);

        if let Some(ty) = expected {
            // Field descriptions are surfaced verbatim.
            system.push_str(&format!(
                "Respond with a JSON object of type {} with fields:\n",
                ty.name
            ));
            for field in &ty.fields {
                match &field.description {
                    Some(description) => system.push_str(&format!(
                        "- {} ({}): {}\n",
                        field.name, field.type_name, description
                    )),
                    None => system.push_str(&format!("- {} ({})\n", field.name, field.type_name)),
                }
            }
        } else if let Some(type_name) = &meta.expected_type {
            system.push_str(&format!("Respond with a single {} value.\n", type_name));
        }

        Ok(Prompt {
            system,
            user: user_content,
        })
    }
}
