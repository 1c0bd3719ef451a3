//! SMTP command builder.

use std::fmt;

use crate::types::Address;

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Reverse path
        from: Address,
        /// ESMTP parameters, already rendered (e.g. `RET=HDRS ENVID=x`)
        params: Option<String>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Forward path
        to: Address,
        /// ESMTP parameters, already rendered (e.g. `NOTIFY=FAILURE`)
        params: Option<String>,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Self::Helo { hostname } => {
                buf.extend_from_slice(b"HELO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::Ehlo { hostname } => {
                buf.extend_from_slice(b"EHLO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::MailFrom { from, params } => {
                buf.extend_from_slice(b"MAIL FROM:<");
                buf.extend_from_slice(from.as_str().as_bytes());
                buf.push(b'>');
                push_params(&mut buf, params.as_deref());
            }
            Self::RcptTo { to, params } => {
                buf.extend_from_slice(b"RCPT TO:<");
                buf.extend_from_slice(to.as_str().as_bytes());
                buf.push(b'>');
                push_params(&mut buf, params.as_deref());
            }
            Self::Data => {
                buf.extend_from_slice(b"DATA");
            }
            Self::Rset => {
                buf.extend_from_slice(b"RSET");
            }
            Self::Quit => {
                buf.extend_from_slice(b"QUIT");
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

fn push_params(buf: &mut Vec<u8>, params: Option<&str>) {
    if let Some(params) = params.filter(|p| !p.is_empty()) {
        buf.push(b' ');
        buf.extend_from_slice(params.as_bytes());
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wire = self.serialize();
        f.write_str(String::from_utf8_lossy(&wire).trim_end())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_helo_command() {
        let cmd = Command::Helo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"HELO client.example.com\r\n");
    }

    #[test]
    fn test_ehlo_command() {
        let cmd = Command::Ehlo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"EHLO client.example.com\r\n");
    }

    #[test]
    fn test_mail_from_simple() {
        let cmd = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
            params: None,
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<sender@example.com>\r\n");
    }

    #[test]
    fn test_mail_from_with_params() {
        let cmd = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
            params: Some("RET=HDRS ENVID=QQ314159".to_string()),
        };
        assert_eq!(
            cmd.serialize(),
            b"MAIL FROM:<sender@example.com> RET=HDRS ENVID=QQ314159\r\n"
        );
    }

    #[test]
    fn test_mail_from_null_path() {
        let cmd = Command::MailFrom {
            from: Address::null(),
            params: None,
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<>\r\n");
    }

    #[test]
    fn test_empty_params_omitted() {
        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
            params: Some(String::new()),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO:<recipient@example.com>\r\n");
    }

    #[test]
    fn test_rcpt_to_with_params() {
        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
            params: Some("NOTIFY=FAILURE ORCPT=rfc822;recipient@example.com".to_string()),
        };
        assert_eq!(
            cmd.serialize(),
            b"RCPT TO:<recipient@example.com> NOTIFY=FAILURE ORCPT=rfc822;recipient@example.com\r\n"
        );
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Rset.serialize(), b"RSET\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }

    #[test]
    fn test_display_trims_crlf() {
        assert_eq!(Command::Rset.to_string(), "RSET");
    }
}
