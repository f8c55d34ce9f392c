use amfork_core::{AlertmanagerError, LabelSet, Matcher, Result};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }
}

/// Compiled label matcher. A missing label matches as the empty string.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub kind: MatchType,
    pub value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    pub fn new(name: &str, kind: MatchType, value: &str) -> Result<Self> {
        if !valid_label_name(name) {
            return Err(AlertmanagerError::InvalidMatcher(format!(
                "invalid label name {name:?}"
            )));
        }
        let regex = match kind {
            MatchType::Regex | MatchType::NotRegex => Some(
                Regex::new(&format!("^(?:{value})$"))
                    .map_err(|e| AlertmanagerError::InvalidMatcher(e.to_string()))?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            name: name.to_string(),
            kind,
            value: value.to_string(),
            regex,
        })
    }

    /// Parse `name=value`, `name!=value`, `name=~re` or `name!~re`
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let expr = expr
            .strip_prefix('{')
            .and_then(|e| e.strip_suffix('}'))
            .unwrap_or(expr)
            .trim();

        let op_at = expr
            .find(|c: char| c == '=' || c == '!')
            .ok_or_else(|| AlertmanagerError::InvalidMatcher(format!("no operator in {expr:?}")))?;
        let (name, rest) = expr.split_at(op_at);
        let (kind, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::Regex, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::NotRegex, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return Err(AlertmanagerError::InvalidMatcher(format!(
                "bad operator in {expr:?}"
            )));
        };
        Self::new(name.trim(), kind, unquote(value.trim()))
    }

    pub fn from_api(matcher: &Matcher) -> Result<Self> {
        let kind = match (matcher.is_regex, matcher.is_equal) {
            (false, true) => MatchType::Equal,
            (false, false) => MatchType::NotEqual,
            (true, true) => MatchType::Regex,
            (true, false) => MatchType::NotRegex,
        };
        Self::new(&matcher.name, kind, &matcher.value)
    }

    pub fn matches_value(&self, value: &str) -> bool {
        match (self.kind, &self.regex) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(value),
            (MatchType::NotRegex, Some(re)) => !re.is_match(value),
            _ => false,
        }
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.matches_value(labels.get(&self.name).map(String::as_str).unwrap_or(""))
    }
}

impl std::fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.kind.as_str(), self.value)
    }
}

pub fn parse_filter(filter: &[String]) -> Result<Vec<LabelMatcher>> {
    filter.iter().map(|expr| LabelMatcher::parse(expr)).collect()
}

pub fn compile(matchers: &[Matcher]) -> Result<Vec<LabelMatcher>> {
    matchers.iter().map(LabelMatcher::from_api).collect()
}

pub fn matches_all(matchers: &[LabelMatcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

pub(crate) fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_operators() {
        let m = LabelMatcher::parse("alertname=HostDown").unwrap();
        assert_eq!(m.kind, MatchType::Equal);
        assert_eq!(m.value, "HostDown");

        let m = LabelMatcher::parse(r#"{severity!="info"}"#).unwrap();
        assert_eq!(m.kind, MatchType::NotEqual);
        assert_eq!(m.value, "info");

        let m = LabelMatcher::parse("instance=~\"db-.*\"").unwrap();
        assert_eq!(m.kind, MatchType::Regex);
        assert!(m.matches(&labels(&[("instance", "db-1")])));
        assert!(!m.matches(&labels(&[("instance", "web-db-1")])));

        let m = LabelMatcher::parse("team!~ops|sre").unwrap();
        assert_eq!(m.kind, MatchType::NotRegex);
        assert!(m.matches(&labels(&[("team", "dev")])));
        assert!(!m.matches(&labels(&[("team", "sre")])));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LabelMatcher::parse("alertname").is_err());
        assert!(LabelMatcher::parse("=value").is_err());
        assert!(LabelMatcher::parse("1abc=value").is_err());
        assert!(LabelMatcher::parse("a=~(").is_err());
    }

    #[test]
    fn test_missing_label_is_empty() {
        let m = LabelMatcher::parse("env=\"\"").unwrap();
        assert!(m.matches(&labels(&[("alertname", "x")])));
        let m = LabelMatcher::parse("env!=\"\"").unwrap();
        assert!(!m.matches(&labels(&[("alertname", "x")])));
    }

    #[test]
    fn test_from_api() {
        let api = Matcher {
            name: "severity".to_string(),
            value: "critical|warning".to_string(),
            is_regex: true,
            is_equal: false,
        };
        let m = LabelMatcher::from_api(&api).unwrap();
        assert_eq!(m.kind, MatchType::NotRegex);
        assert!(m.matches(&labels(&[("severity", "info")])));
        assert_eq!(m.to_string(), "severity!~\"critical|warning\"");
    }

    #[test]
    fn test_matches_all() {
        let matchers = parse_filter(&["a=1".to_string(), "b!=2".to_string()]).unwrap();
        assert!(matches_all(&matchers, &labels(&[("a", "1"), ("b", "3")])));
        assert!(!matches_all(&matchers, &labels(&[("a", "1"), ("b", "2")])));
        assert!(matches_all(&[], &labels(&[])));
    }
}
