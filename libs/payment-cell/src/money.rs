use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use shared_config::parse_minor_units;

/// Deserialises a major-unit decimal given as a JSON number or string
/// (`5000`, `5000.5`, `"5000.50"`) into integer minor units.
pub fn deserialize_major_amount<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let text = match &raw {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        _ => return Err(de::Error::custom("amount must be a number or decimal string")),
    };

    match parse_minor_units(&text) {
        Some(minor) if minor > 0 => Ok(minor),
        Some(_) => Err(de::Error::custom("amount must be greater than zero")),
        None => Err(de::Error::custom(format!(
            "invalid amount {:?}: expected a positive decimal with at most two fraction digits",
            text
        ))),
    }
}

/// Renders minor units as a major-unit decimal string, e.g. `500000` -> `"5000.00"`.
pub fn format_major(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

pub fn is_currency_code(raw: &str) -> bool {
    raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Body {
        #[serde(deserialize_with = "deserialize_major_amount")]
        amount: i64,
    }

    #[test]
    fn accepts_numbers_and_strings() {
        let body: Body = serde_json::from_value(json!({"amount": 5000})).unwrap();
        assert_eq!(body.amount, 500_000);

        let body: Body = serde_json::from_value(json!({"amount": 19.99})).unwrap();
        assert_eq!(body.amount, 1_999);

        let body: Body = serde_json::from_value(json!({"amount": "250.5"})).unwrap();
        assert_eq!(body.amount, 25_050);
    }

    #[test]
    fn rejects_zero_and_excess_precision() {
        assert!(serde_json::from_value::<Body>(json!({"amount": 0})).is_err());
        assert!(serde_json::from_value::<Body>(json!({"amount": "1.234"})).is_err());
        assert!(serde_json::from_value::<Body>(json!({"amount": true})).is_err());
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_major(500_000), "5000.00");
        assert_eq!(format_major(5), "0.05");
        assert!(is_currency_code("NGN"));
        assert!(!is_currency_code("NG"));
    }
}
