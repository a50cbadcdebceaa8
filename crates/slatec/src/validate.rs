pub fn validate_kernel_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("kernel name must not be empty".to_string());
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!(
            "invalid kernel name (path separators are not allowed): {name:?}"
        ));
    }

    for seg in name.split('.') {
        if seg.is_empty() {
            return Err(format!("invalid kernel name (empty segment): {name:?}"));
        }
        let mut chars = seg.chars();
        let first = chars.next().unwrap_or('_');
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(format!(
                "invalid kernel name segment start (must be [A-Za-z_]): {name:?} segment={seg:?}"
            ));
        }
        for c in chars {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!(
                    "invalid kernel name segment char (allowed [A-Za-z0-9_]): {name:?} segment={seg:?}"
                ));
            }
        }
    }

    Ok(())
}

pub fn validate_param_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("param name must be non-empty".to_string());
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('_');
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!(
            "invalid param name start (must be [A-Za-z_]): {name:?}"
        ));
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!(
                "invalid param name char (allowed [A-Za-z0-9_]): {name:?}"
            ));
        }
    }
    Ok(())
}
