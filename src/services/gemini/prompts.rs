// Prompt wording for the two model calls.
//
// The example block is a shape hint for the model, not strict JSON; its
// wording is load-bearing for consistent output, so leave it alone.

const EXAMPLE_TABLE: &str = r#"
{
    [
        {
            "Size": "XS(085)",
            "어깨너비": "53.5",
            "소매길이": "57.5",
            "전체길이": "64",
            "가슴둘레": "123"
        }
    ]
}
"#;

/// Instruction sent alongside the inline image part.
pub fn extraction_prompt() -> String {
    format!(
        "Extract table from image and return in JSON format. Example format: {}",
        EXAMPLE_TABLE
    )
}

/// Text-only instruction wrapping a previously extracted table.
pub fn translation_prompt(extracted_json: &str) -> String {
    format!(
        "Translate this JSON to English, maintaining the exact same JSON structure. \
         Convert all Korean keys and text to English. Return only the JSON, no additional text:\n{}",
        extracted_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_includes_example_columns() {
        let prompt = extraction_prompt();
        assert!(prompt.starts_with("Extract table from image"));
        assert!(prompt.contains("XS(085)"));
        assert!(prompt.contains("어깨너비"));
        assert!(prompt.contains("가슴둘레"));
    }

    #[test]
    fn translation_prompt_embeds_payload_verbatim() {
        let extracted = r#"{"Size": "M", "전체길이": "64"}"#;
        let prompt = translation_prompt(extracted);
        assert!(prompt.starts_with("Translate this JSON to English"));
        assert!(prompt.contains("Return only the JSON"));
        assert!(prompt.ends_with(extracted));
    }

    #[test]
    fn translation_prompt_keeps_non_json_payloads() {
        // Extraction output is stored verbatim, so the translation prompt
        // must carry whatever the model produced, fenced text included.
        let extracted = "```json\n{\"Size\": \"M\"}\n```";
        let prompt = translation_prompt(extracted);
        assert!(prompt.ends_with(extracted));
    }
}
