//! Codec des datagrammes SSDP.

use std::collections::HashMap;

use tracing::trace;

use crate::ssdp::{MAX_SEARCH_MX, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Annonce de présence (`NOTIFY` / `ssdp:alive`).
#[derive(Debug, Clone, PartialEq)]
pub struct Alive {
    pub nt: String,
    pub usn: String,
    pub location: String,
    pub server: String,
    pub max_age: u32,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
}

/// Annonce de départ (`NOTIFY` / `ssdp:byebye`).
#[derive(Debug, Clone, PartialEq)]
pub struct ByeBye {
    pub nt: String,
    pub usn: String,
}

/// Recherche active (`M-SEARCH`).
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub st: String,
    pub mx: u32,
}

/// Réponse unicast à un `M-SEARCH`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub st: String,
    pub usn: String,
    pub location: String,
    pub server: String,
    pub max_age: u32,
}

/// Message SSDP décodé.
#[derive(Debug, Clone, PartialEq)]
pub enum SsdpMessage {
    Alive(Alive),
    ByeBye(ByeBye),
    Search(Search),
    SearchResponse(SearchResponse),
}

impl SsdpMessage {
    /// Décode un datagramme ; `None` pour tout ce qui n'est pas un
    /// message SSDP exploitable (le routeur ignore et continue).
    pub fn parse(data: &[u8]) -> Option<SsdpMessage> {
        let text = std::str::from_utf8(data).ok()?;
        let mut lines = text.lines();
        let first_line = lines.next()?.trim();
        let upper = first_line.to_ascii_uppercase();
        let headers = parse_headers(lines);

        if upper.starts_with("NOTIFY ") {
            parse_notify(&headers)
        } else if upper.starts_with("M-SEARCH ") {
            parse_search(&headers)
        } else if upper.starts_with("HTTP/") && upper.contains(" 200 ") {
            parse_search_response(&headers)
        } else {
            trace!("unknown SSDP start line: {}", first_line);
            None
        }
    }

    /// Encode le message en datagramme CRLF.
    pub fn to_bytes(&self) -> Vec<u8> {
        let host = format!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}");
        let text = match self {
            SsdpMessage::Alive(alive) => {
                let mut msg = format!(
                    "NOTIFY * HTTP/1.1\r\n\
                     HOST: {}\r\n\
                     CACHE-CONTROL: max-age={}\r\n\
                     LOCATION: {}\r\n\
                     NT: {}\r\n\
                     NTS: ssdp:alive\r\n\
                     SERVER: {}\r\n\
                     USN: {}\r\n",
                    host, alive.max_age, alive.location, alive.nt, alive.server, alive.usn
                );
                if let Some(boot_id) = alive.boot_id {
                    msg.push_str(&format!("BOOTID.UPNP.ORG: {boot_id}\r\n"));
                }
                if let Some(config_id) = alive.config_id {
                    msg.push_str(&format!("CONFIGID.UPNP.ORG: {config_id}\r\n"));
                }
                msg.push_str("\r\n");
                msg
            }
            SsdpMessage::ByeBye(byebye) => format!(
                "NOTIFY * HTTP/1.1\r\n\
                 HOST: {}\r\n\
                 NT: {}\r\n\
                 NTS: ssdp:byebye\r\n\
                 USN: {}\r\n\
                 \r\n",
                host, byebye.nt, byebye.usn
            ),
            SsdpMessage::Search(search) => format!(
                "M-SEARCH * HTTP/1.1\r\n\
                 HOST: {}\r\n\
                 MAN: \"ssdp:discover\"\r\n\
                 MX: {}\r\n\
                 ST: {}\r\n\
                 \r\n",
                host,
                search.mx.min(MAX_SEARCH_MX),
                search.st
            ),
            SsdpMessage::SearchResponse(resp) => {
                let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
                format!(
                    "HTTP/1.1 200 OK\r\n\
                     CACHE-CONTROL: max-age={}\r\n\
                     DATE: {}\r\n\
                     EXT:\r\n\
                     LOCATION: {}\r\n\
                     SERVER: {}\r\n\
                     ST: {}\r\n\
                     USN: {}\r\n\
                     \r\n",
                    resp.max_age, date, resp.location, resp.server, resp.st, resp.usn
                )
            }
        };
        text.into_bytes()
    }
}

fn parse_notify(headers: &HashMap<String, String>) -> Option<SsdpMessage> {
    let nts = headers.get("NTS")?.to_ascii_lowercase();
    let nt = headers.get("NT")?.to_string();
    let usn = headers.get("USN")?.to_string();

    if nts == "ssdp:alive" {
        let location = headers.get("LOCATION")?.to_string();
        Some(SsdpMessage::Alive(Alive {
            nt,
            usn,
            location,
            server: headers.get("SERVER").cloned().unwrap_or_default(),
            max_age: parse_max_age(headers.get("CACHE-CONTROL"))?,
            boot_id: headers.get("BOOTID.UPNP.ORG").and_then(|v| v.parse().ok()),
            config_id: headers.get("CONFIGID.UPNP.ORG").and_then(|v| v.parse().ok()),
        }))
    } else if nts == "ssdp:byebye" {
        Some(SsdpMessage::ByeBye(ByeBye { nt, usn }))
    } else {
        trace!("unknown NTS value: {}", nts);
        None
    }
}

fn parse_search(headers: &HashMap<String, String>) -> Option<SsdpMessage> {
    // MAN: "ssdp:discover" est obligatoire.
    let man = headers.get("MAN")?;
    if man.trim_matches('"') != "ssdp:discover" {
        return None;
    }
    let st = headers.get("ST")?.to_string();
    let mx = headers
        .get("MX")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_SEARCH_MX);
    Some(SsdpMessage::Search(Search { st, mx }))
}

fn parse_search_response(headers: &HashMap<String, String>) -> Option<SsdpMessage> {
    Some(SsdpMessage::SearchResponse(SearchResponse {
        st: headers.get("ST")?.to_string(),
        usn: headers.get("USN")?.to_string(),
        location: headers.get("LOCATION")?.to_string(),
        server: headers.get("SERVER").cloned().unwrap_or_default(),
        max_age: parse_max_age(headers.get("CACHE-CONTROL"))?,
    }))
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        // Coupe au premier ':' seulement, les valeurs peuvent en contenir.
        if let Some(colon) = line.find(':') {
            let (name, value) = line.split_at(colon);
            let name = name.trim().to_ascii_uppercase();
            let value = value[1..].trim().to_string();
            if !name.is_empty() {
                headers.insert(name, value);
            }
        } else {
            trace!("skipping malformed SSDP header line: '{}'", line);
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> Option<u32> {
    let v = value?;
    let lower = v.to_ascii_lowercase();
    let idx = lower.find("max-age")?;
    let after = v[idx + 7..].trim_start().trim_start_matches('=').trim_start();
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
