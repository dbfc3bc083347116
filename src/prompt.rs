//! Prompt construction for invoice extraction.

use crate::config::ExtractionConfig;
use crate::schema::items_json_schema;

/// Build the system instruction: role preamble, column mappings, output rules.
pub fn system_prompt(config: &ExtractionConfig) -> String {
    let mut lines = vec![
        config.prompts.preamble.trim().to_string(),
        "Your task is to extract itemized data from the invoice table using the following mappings:"
            .to_string(),
    ];

    lines.extend(
        config
            .field_mappings
            .iter()
            .map(|m| format!("* {} → from '{}'", m.field, m.source_label)),
    );

    lines.push(config.prompts.rules.trim().to_string());
    lines.join("\n")
}

/// Build the user turn: the machine-readable schema, then an open JSON fence
/// for the model to complete.
pub fn user_prompt() -> String {
    [
        "## Output Schema:".to_string(),
        items_json_schema().to_string(),
        String::new(),
        "## Invoice Details:".to_string(),
        "```json".to_string(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_default_config;

    #[test]
    fn test_system_prompt_lists_mappings_in_order() {
        let prompt = system_prompt(&create_default_config());
        let lines: Vec<&str> = prompt.lines().collect();

        assert!(lines[0].contains("Arabic VAT invoices"));
        let mapping_start = lines
            .iter()
            .position(|l| l.starts_with("Your task is"))
            .unwrap();
        assert_eq!(lines[mapping_start + 1], "* Item ID → from 'رقم الصنف'");
        assert_eq!(lines[mapping_start + 5], "* Tax Amount → from '15%الضريبة%'");
        assert_eq!(lines[mapping_start + 6], "* Total Amount → from 'الاجمالي'");
        assert!(prompt.ends_with("Only return the JSON object."));
    }

    #[test]
    fn test_user_prompt_embeds_schema() {
        let prompt = user_prompt();
        assert!(prompt.starts_with("## Output Schema:\n{"));
        assert!(prompt.contains("\"Total Amount\""));
        assert!(prompt.ends_with("## Invoice Details:\n```json"));
    }
}
