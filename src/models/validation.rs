use anyhow::{Result, anyhow};

pub fn validate_push_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(anyhow!("Device token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}

pub fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

/// Hides most of an email address or phone number for logging.
pub fn mask_contact(value: &str) -> String {
    if let Some((local, domain)) = value.split_once('@') {
        let visible: String = local.chars().take(3).collect();
        return format!("{}***@{}", visible, domain);
    }

    let count = value.chars().count();
    if count > 4 {
        let tail: String = value.chars().skip(count - 4).collect();
        return format!("***{}", tail);
    }

    "***".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_token_rules() {
        assert!(validate_push_token("").is_err());
        assert!(validate_push_token("short").is_err());
        assert!(validate_push_token(&"a".repeat(201)).is_err());
        assert!(validate_push_token("bad token with spaces!!").is_err());
        assert!(validate_push_token("dGVzdF90b2tlbl8xMjM0NTY3ODkw:APA91b").is_ok());
    }

    #[test]
    fn test_email_detection() {
        assert!(is_email("user@example.com"));
        assert!(!is_email("user-1234"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("user@localhost"));
    }

    #[test]
    fn test_mask_contact() {
        assert_eq!(mask_contact("johndoe@example.com"), "joh***@example.com");
        assert_eq!(mask_contact("+966500000123"), "***0123");
        assert_eq!(mask_contact("123"), "***");
    }
}
