/// Translates between the symbol names alerts use (`EURUSD`) and the names a
/// broker publishes (`EURUSD.r`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolMapper {
    suffix: String,
}

impl SymbolMapper {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Append the suffix unless the name already carries it.
    pub fn to_broker(&self, symbol: &str) -> String {
        if self.suffix.is_empty() || symbol.ends_with(&self.suffix) {
            symbol.to_string()
        } else {
            format!("{}{}", symbol, self.suffix)
        }
    }

    /// Strip the suffix. `None` when the name does not carry it.
    pub fn to_logical<'a>(&self, broker_symbol: &'a str) -> Option<&'a str> {
        if self.suffix.is_empty() {
            return None;
        }
        broker_symbol.strip_suffix(self.suffix.as_str())
    }
}

/// Names in `available` that contain the base of `symbol` (the part before any
/// `.`), for diagnosing a symbol the terminal does not know.
pub fn similar_symbols<'a, I>(symbol: &str, available: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let base = symbol.split('.').next().unwrap_or(symbol);
    available
        .into_iter()
        .filter(|name| name.contains(base))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_round_trip() {
        let mapper = SymbolMapper::new(".r");
        assert_eq!(mapper.to_broker("EURUSD"), "EURUSD.r");
        assert_eq!(mapper.to_broker("EURUSD.r"), "EURUSD.r");
        assert_eq!(mapper.to_logical("EURUSD.r"), Some("EURUSD"));
        assert_eq!(mapper.to_logical("EURUSD"), None);
    }

    #[test]
    fn test_empty_suffix_is_identity() {
        let mapper = SymbolMapper::default();
        assert_eq!(mapper.to_broker("GBPUSD"), "GBPUSD");
        assert_eq!(mapper.to_logical("GBPUSD"), None);
    }

    #[test]
    fn test_similar_symbols() {
        let available = ["EURUSD.r", "EURUSDm", "GBPUSD.r", "EURGBP.r"];
        assert_eq!(
            similar_symbols("EURUSD.x", available),
            vec!["EURUSD.r".to_string(), "EURUSDm".to_string()]
        );
        assert!(similar_symbols("XYZUSD", available).is_empty());
    }
}
