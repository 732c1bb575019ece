/// Property-based tests using proptest
/// Tests invariants of the incremental stream parser for arbitrary inputs
use proptest::prelude::*;
use porquienvotar_api::partial_json::{extract_string_field, parse_llm_json, StreamAccumulator};

fn answer_json(message: &str, is_final: bool) -> String {
    serde_json::json!({
        "client_response": {"message": message, "is_final_answer": is_final},
        "hidden_analysis": {"user_intents": []}
    })
    .to_string()
}

// Property: parsing never panics
proptest! {
    #[test]
    fn parse_never_panics(text in "\\PC*") {
        let _ = parse_llm_json(&text);
    }

    #[test]
    fn extraction_never_panics(text in ".*") {
        let _ = extract_string_field(&text, "message");
    }

    #[test]
    fn extraction_never_panics_on_escape_soup(text in r#"[\\u0-9a-fA-F"dD]{0,40}"#) {
        let input = format!(r#"{{"message": "{}"#, text);
        let _ = extract_string_field(&input, "message");
    }
}

// Property: the visible message only grows while the answer streams in
proptest! {
    #[test]
    fn visible_message_is_prefix_of_final(message in "\\PC{0,60}", is_final in any::<bool>()) {
        let json = answer_json(&message, is_final);

        let mut acc = StreamAccumulator::new();
        let mut previous = String::new();
        for c in json.chars() {
            let mut buf = [0u8; 4];
            acc.push(c.encode_utf8(&mut buf));

            if let Some(visible) = acc.visible_message() {
                prop_assert!(message.starts_with(&visible));
                prop_assert!(visible.starts_with(&previous));
                previous = visible;
            }
        }

        prop_assert_eq!(acc.visible_message(), Some(message.clone()));
        let parsed = acc.finish().unwrap();
        prop_assert_eq!(parsed.client_response.message, message);
        prop_assert_eq!(parsed.client_response.is_final_answer, is_final);
    }

    #[test]
    fn message_with_escapes_decodes(message in "[a-zñáé \"\\\\\n\t\u{1F600}]{0,30}") {
        let json = answer_json(&message, false);
        prop_assert_eq!(extract_string_field(&json, "message"), Some(message));
    }
}

// Property: byte-level chunking never corrupts multi-byte characters
proptest! {
    #[test]
    fn push_bytes_split_anywhere(message in "\\PC{0,40}", split in any::<prop::sample::Index>()) {
        let json = answer_json(&message, true);
        let bytes = json.as_bytes();
        let at = split.index(bytes.len() + 1);

        let mut acc = StreamAccumulator::new();
        acc.push_bytes(&bytes[..at]);
        acc.push_bytes(&bytes[at..]);

        prop_assert_eq!(acc.text(), json.as_str());
        prop_assert_eq!(acc.finish().unwrap().client_response.message, message);
    }
}
