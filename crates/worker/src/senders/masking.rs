//! 日志和投递记录中的敏感信息脱敏

/// 密钥类参数：保留首尾各4位
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.trim().chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// 邮箱：保留本地部分前2位和域名
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return "****".to_string();
    };
    let local: Vec<char> = local.chars().collect();
    if local.len() <= 2 {
        return format!("**@{domain}");
    }
    let head: String = local[..2].iter().collect();
    format!("{head}****@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "****");
        assert_eq!(mask_secret("12345678"), "****");
        assert_eq!(mask_secret("abcdefghijkl"), "abcd****ijkl");
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("invalid"), "****");
        assert_eq!(mask_email("ab@example.com"), "**@example.com");
        assert_eq!(mask_email("alice@example.com"), "al****@example.com");
    }
}
