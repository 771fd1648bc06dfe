use serde_json::{json, Value};

use crate::cli::OutputFormat;

/// Output a success message in the appropriate format
pub fn output_success(output_format: OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });
            if let (Some(Value::Object(extra)), Some(body)) = (data, response.as_object_mut()) {
                body.extend(extra);
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Print `data` as pretty JSON, or as `key: value` lines for text output.
pub fn output_fields(output_format: OutputFormat, data: &Value) -> anyhow::Result<()> {
    match (output_format, data) {
        (OutputFormat::Text, Value::Object(map)) => {
            for (key, value) in map {
                match value {
                    Value::String(s) => println!("{}: {}", key, s),
                    other => println!("{}: {}", key, other),
                }
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(data)?),
    }
    Ok(())
}
