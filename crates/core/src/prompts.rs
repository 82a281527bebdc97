use crate::error::GatewayError;
use crate::models::ChatMessage;

pub fn format_history(heading: &str, history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut rendered = format!("\n\n{heading}:\n");
    for message in history {
        rendered.push_str(message.role.label());
        rendered.push_str(": ");
        rendered.push_str(&message.content);
        rendered.push('\n');
    }
    rendered
}

pub fn parse_integer_array(raw: &str) -> Result<Vec<i64>, GatewayError> {
    let trimmed = strip_code_fence(raw.trim());
    serde_json::from_str::<Vec<i64>>(trimmed).map_err(|error| {
        GatewayError::MalformedOutput(format!(
            "expected a JSON array of integers ({error}): {}",
            crate::chunking::char_prefix(trimmed, 120)
        ))
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_rendered_in_insertion_order() {
        let history = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
        ];
        let rendered = format_history("Chat History", &history);
        assert_eq!(rendered, "\n\nChat History:\nUser: first\nAssistant: second\n");
    }

    #[test]
    fn empty_history_renders_nothing() {
        assert_eq!(format_history("Chat History", &[]), "");
    }

    #[test]
    fn integer_arrays_parse_with_or_without_fences() {
        assert_eq!(parse_integer_array(" [1, 3, 5] ").unwrap(), vec![1, 3, 5]);
        assert_eq!(parse_integer_array("```json\n[2]\n```").unwrap(), vec![2]);
        assert_eq!(parse_integer_array("[]").unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn prose_and_string_arrays_are_malformed() {
        assert!(matches!(
            parse_integer_array("Pages 1 and 2 look relevant"),
            Err(GatewayError::MalformedOutput(_))
        ));
        assert!(parse_integer_array(r#"["a.pdf"]"#).is_err());
    }
}
