//! Suspicious-token grammar matched against commands and paths.

use once_cell::sync::Lazy;
use regex::Regex;

/// A named pattern; each match contributes one indicator.
pub struct TokenPattern {
    pub name: &'static str,
    regex: Regex,
}

impl TokenPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).unwrap(),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Every pattern here escalates to critical on its own.
pub static SUSPICIOUS_TOKENS: Lazy<Vec<TokenPattern>> = Lazy::new(|| {
    vec![
        TokenPattern::new(
            "download piped to shell",
            r"(?i)\b(curl|wget|fetch)\b[^|;&]*\|\s*(sudo\s+)?(ba|z|da|k|c)?sh\b|\b(curl|wget)\b[^|;&]*\|\s*(python[0-9.]*|perl|ruby)\b",
        ),
        TokenPattern::new(
            "base64 payload decoding",
            r"(?i)\bbase64\s+(-d|--decode|-D)\b|FromBase64String|\bcertutil(\.exe)?\b.*\s-decode\b",
        ),
        TokenPattern::new(
            "encoded PowerShell command",
            r"(?i)\b(powershell|pwsh)(\.exe)?\b.*\s-(e|ec|en|enc|enco|encodedcommand)\s+[A-Za-z0-9+/=]{8,}",
        ),
        TokenPattern::new(
            "hidden window",
            r"(?i)\s-(w|wi|win|windowstyle)\s+(h|hidden)\b|\bvbHide\b|\bSW_HIDE\b",
        ),
        TokenPattern::new("Invoke-Expression", r"(?i)\b(invoke-expression|iex)\b"),
        TokenPattern::new(
            "eval of downloaded content",
            r#"(?i)\beval\s+["']?\$\(\s*(curl|wget|fetch)\b"#,
        ),
        TokenPattern::new(
            "mshta remote script",
            r#"(?i)\bmshta(\.exe)?\s+["']?(https?|javascript|vbscript):"#,
        ),
        TokenPattern::new(
            "regsvr32 remote scriptlet",
            r#"(?i)\bregsvr32(\.exe)?\b.*[/-]i:\s*["']?https?:"#,
        ),
        TokenPattern::new(
            "rundll32 javascript",
            r"(?i)\brundll32(\.exe)?\b.*javascript:",
        ),
        TokenPattern::new("reverse shell redirection", r"/dev/(tcp|udp)/[^/\s]+/\d+"),
    ]
});

/// Names of every pattern matching `text`, in table order.
pub fn matches(text: &str) -> Vec<&'static str> {
    if text.is_empty() {
        return Vec::new();
    }
    SUSPICIOUS_TOKENS
        .iter()
        .filter(|p| p.is_match(text))
        .map(|p| p.name)
        .collect()
}
