use serde::Serialize;

/// Serialize with 4-space indentation, the layout WPILib tools write.
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_space_indent() {
        let value = serde_json::json!({"a": [1, 2]});
        let s = to_json_pretty(&value).unwrap();
        assert_eq!(s, "{\n    \"a\": [\n        1,\n        2\n    ]\n}");
    }
}
