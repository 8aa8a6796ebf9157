use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::method::Method;

/// CSeq header value: sequence number plus method
///
/// # Examples
///
/// ```rust
/// use voxsip_sip_core::{CSeq, Method};
/// use std::str::FromStr;
///
/// let cseq = CSeq::from_str("314159 INVITE").unwrap();
/// assert_eq!(cseq.seq, 314159);
/// assert_eq!(cseq.method, Method::Invite);
/// assert_eq!(cseq.to_string(), "314159 INVITE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    /// Sequence number
    pub seq: u32,
    /// Request method the sequence number applies to
    pub method: Method,
}

impl CSeq {
    /// Creates a CSeq value
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split_whitespace();
        let seq = parts
            .next()
            .ok_or_else(|| Error::InvalidHeader(format!("empty CSeq: {:?}", s)))?
            .parse::<u32>()
            .map_err(|_| Error::InvalidHeader(format!("bad CSeq number: {:?}", s)))?;
        let method = parts
            .next()
            .ok_or_else(|| Error::InvalidHeader(format!("CSeq missing method: {:?}", s)))?;
        Ok(CSeq {
            seq,
            method: Method::from_str(method)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let cseq = CSeq::from_str("1 REGISTER").unwrap();
        assert_eq!(cseq, CSeq::new(1, Method::Register));
        assert_eq!(cseq.to_string(), "1 REGISTER");
    }

    #[test]
    fn tolerates_extra_whitespace() {
        let cseq = CSeq::from_str("  42   BYE ").unwrap();
        assert_eq!(cseq, CSeq::new(42, Method::Bye));
    }

    #[test]
    fn rejects_malformed() {
        assert!(CSeq::from_str("").is_err());
        assert!(CSeq::from_str("INVITE").is_err());
        assert!(CSeq::from_str("abc INVITE").is_err());
    }
}
