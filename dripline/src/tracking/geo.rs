//! IP geolocation.

use std::net::IpAddr;
use std::path::Path;

/// Where an address is, as far as the lookup knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Option<GeoLocation>;
}

/// Lookup that never knows anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn lookup(&self, _ip: IpAddr) -> Option<GeoLocation> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeoTableError {
    #[error("failed to read geo table: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, Clone)]
struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    fn parse(raw: &str) -> Result<Self, String> {
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| format!("invalid address {addr:?}: {e}"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("invalid prefix {p:?}"))?,
            None => max,
        };
        Ok(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Longest-prefix match over a `cidr,country,city` CSV table.
#[derive(Debug, Clone, Default)]
pub struct TableGeoLookup {
    entries: Vec<(Network, GeoLocation)>,
}

impl TableGeoLookup {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GeoTableError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_csv(&text)
    }

    /// Blank lines and `#` comments are ignored. Empty country or city
    /// columns mean unknown.
    pub fn from_csv(text: &str) -> Result<Self, GeoTableError> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, ',').map(str::trim);
            let network = fields.next().unwrap_or_default();
            let network = Network::parse(network).map_err(|reason| GeoTableError::Parse {
                line: index + 1,
                reason,
            })?;
            let non_empty = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);
            let location = GeoLocation {
                country: non_empty(fields.next()),
                city: non_empty(fields.next()),
            };
            entries.push((network, location));
        }
        entries.sort_by(|a, b| b.0.prefix.cmp(&a.0.prefix));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GeoLookup for TableGeoLookup {
    fn lookup(&self, ip: IpAddr) -> Option<GeoLocation> {
        self.entries
            .iter()
            .find(|(network, _)| network.contains(ip))
            .map(|(_, location)| location.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
# cidr,country,city
203.0.113.0/24,AU,Sydney
203.0.0.0/16,AU,
198.51.100.7,US,Portland
2001:db8::/32,DE,Berlin
";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = TableGeoLookup::from_csv(TABLE).unwrap();
        assert_eq!(table.len(), 4);

        let sydney = table.lookup(ip("203.0.113.9")).unwrap();
        assert_eq!(sydney.city.as_deref(), Some("Sydney"));

        let broad = table.lookup(ip("203.0.1.1")).unwrap();
        assert_eq!(broad.country.as_deref(), Some("AU"));
        assert_eq!(broad.city, None);
    }

    #[test]
    fn test_host_and_v6_entries() {
        let table = TableGeoLookup::from_csv(TABLE).unwrap();
        assert_eq!(
            table.lookup(ip("198.51.100.7")).unwrap().city.as_deref(),
            Some("Portland")
        );
        assert!(table.lookup(ip("198.51.100.8")).is_none());
        assert_eq!(
            table.lookup(ip("2001:db8::1")).unwrap().country.as_deref(),
            Some("DE")
        );
        assert!(table.lookup(ip("192.0.2.1")).is_none());
    }

    #[test]
    fn test_zero_prefix_matches_everything() {
        let table = TableGeoLookup::from_csv("0.0.0.0/0,ZZ,").unwrap();
        assert_eq!(
            table.lookup(ip("8.8.8.8")).unwrap().country.as_deref(),
            Some("ZZ")
        );
        assert!(table.lookup(ip("::1")).is_none());
    }

    #[test]
    fn test_bad_rows_report_line() {
        let err = TableGeoLookup::from_csv("10.0.0.0/8,XX,\nnot-an-ip,YY,").unwrap_err();
        assert!(matches!(err, GeoTableError::Parse { line: 2, .. }));
        let err = TableGeoLookup::from_csv("10.0.0.0/33,XX,").unwrap_err();
        assert!(matches!(err, GeoTableError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_no_lookup() {
        assert!(NoGeoLookup.lookup(ip("203.0.113.9")).is_none());
    }
}
