// WSJT-X / JTDX UDP Protocol Parser
// Reference: NetworkMessage.hpp from WSJT-X source

/// WSJT-X Magic Number
pub const WSJTX_MAGIC: u32 = 0xadbccbda;

/// Message-type discriminant for the Status record (type 1).
/// Everything else on the wire is ignored by this tool.
const MSG_TYPE_STATUS: u32 = 1;

/// The one field we care about from a Status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    pub tx_enabled: bool,
}

/// QSO-relevant tokens scanned out of a datagram's text payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextEvent {
    /// Own callsign immediately followed by a partner callsign.
    pub qso_start: Option<String>,
    /// Own callsign plus a completion marker (73/R73/RR73) in the same line.
    pub finished: bool,
    /// CQ announcement carrying the mode tag and our own callsign.
    pub cq: bool,
}

impl TextEvent {
    pub fn is_empty(&self) -> bool {
        self.qso_start.is_none() && !self.finished && !self.cq
    }
}

/// Read a Qt-style string from the buffer
/// Format: u32 length (0xFFFFFFFF for null), then UTF-8 bytes
pub fn read_qt_string(data: &[u8], offset: &mut usize) -> Option<String> {
    if *offset + 4 > data.len() {
        return None;
    }

    let len = u32::from_be_bytes([
        data[*offset],
        data[*offset + 1],
        data[*offset + 2],
        data[*offset + 3],
    ]);
    *offset += 4;

    if len == 0xFFFFFFFF {
        return Some(String::new()); // Null string
    }

    let len = len as usize;
    if *offset + len > data.len() {
        return None;
    }

    let s = String::from_utf8_lossy(&data[*offset..*offset + len]).to_string();
    *offset += len;
    Some(s)
}

/// Decode a Status record (type 1) down to its "TX enabled" boolean.
///
/// Header is magic + schema + type, all big-endian u32. Within the record
/// we skip, in fixed order: id, dial frequency (u64), mode, DX call,
/// report, TX mode, and then read the tx-enabled flag. Anything that is
/// not a well-formed Status record yields None; truncation and bad magic
/// are never errors.
pub fn decode_status(data: &[u8]) -> Option<StatusFrame> {
    if data.len() < 12 {
        return None;
    }

    let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if magic != WSJTX_MAGIC {
        return None;
    }

    let _schema = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    let msg_type = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    if msg_type != MSG_TYPE_STATUS {
        return None;
    }

    let mut offset = 12;

    let _id = read_qt_string(data, &mut offset)?;

    // Dial frequency (u64) - skipped
    if offset + 8 > data.len() {
        return None;
    }
    offset += 8;

    let _mode = read_qt_string(data, &mut offset)?;
    let _dx_call = read_qt_string(data, &mut offset)?;
    let _report = read_qt_string(data, &mut offset)?;
    let _tx_mode = read_qt_string(data, &mut offset)?;

    if offset >= data.len() {
        return None;
    }

    Some(StatusFrame {
        tx_enabled: data[offset] != 0,
    })
}

/// Scan a datagram's text payload for QSO start / finish / own-CQ patterns.
///
/// The payload is decoded lossily as ASCII and split into alphanumeric
/// tokens, so a callsign only ever matches on word boundaries - "5Z4XBX"
/// does not contain "5Z4XB". Binary Status records carry callsign and mode
/// strings inline, so the same scan works on both frame kinds.
pub fn scan_text(data: &[u8], own_call: &str, mode_tag: &str) -> TextEvent {
    let text = String::from_utf8_lossy(data).to_ascii_uppercase();
    let own_call = own_call.to_ascii_uppercase();
    let mode_tag = mode_tag.to_ascii_uppercase();

    let tokens: Vec<String> = text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '/'))
        .filter(|t| !t.is_empty())
        .map(clean_callsign)
        .collect();

    let mut event = TextEvent::default();

    let own_at = match tokens.iter().position(|t| *t == own_call) {
        Some(i) => i,
        None => return event,
    };

    // (a) own callsign immediately followed by a partner callsign
    if let Some(partner) = tokens.get(own_at + 1) {
        if *partner != own_call && !is_finish_marker(partner) && is_valid_callsign(partner) {
            event.qso_start = Some(partner.clone());
        }
    }

    // (b) completion marker anywhere alongside our own callsign
    event.finished = tokens.iter().any(|t| is_finish_marker(t));

    // (c) mode tag with our callsign after it: we are the one calling CQ
    if let Some(mode_at) = tokens.iter().position(|t| *t == mode_tag) {
        event.cq = own_at > mode_at;
    }

    event
}

/// Conventional sign-off tokens: 73, R73, RR73.
fn is_finish_marker(tok: &str) -> bool {
    matches!(tok, "73" | "R73" | "RR73")
}

/// Clean angle brackets and other decorations from callsigns
pub fn clean_callsign(s: &str) -> String {
    let s = s.trim();
    if s.starts_with('<') && s.ends_with('>') {
        s[1..s.len() - 1].to_uppercase()
    } else {
        s.to_uppercase()
    }
}

/// Basic validation that a string looks like a callsign
/// Callsigns typically have letters and numbers, 3-10 chars
pub fn is_valid_callsign(s: &str) -> bool {
    let len = s.len();
    if len < 3 || len > 10 {
        return false;
    }

    // Must contain at least one digit
    let has_digit = s.chars().any(|c| c.is_ascii_digit());
    // Must contain at least one letter
    let has_letter = s.chars().any(|c| c.is_ascii_alphabetic());
    // All chars must be alphanumeric or /
    let all_valid = s.chars().all(|c| c.is_ascii_alphanumeric() || c == '/');

    has_digit && has_letter && all_valid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_qt_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// Build a minimal but well-formed Status datagram.
    fn status_payload(tx_enabled: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&WSJTX_MAGIC.to_be_bytes());
        buf.extend_from_slice(&3u32.to_be_bytes()); // schema
        buf.extend_from_slice(&1u32.to_be_bytes()); // type = Status
        write_qt_string(&mut buf, "JTDX");
        buf.extend_from_slice(&14_074_000u64.to_be_bytes()); // dial freq
        write_qt_string(&mut buf, "FT8");
        write_qt_string(&mut buf, "K1ABC"); // dx call
        write_qt_string(&mut buf, "-10"); // report
        write_qt_string(&mut buf, "FT8"); // tx mode
        buf.push(if tx_enabled { 1 } else { 0 });
        buf
    }

    #[test]
    fn test_decode_status_tx_flag() {
        assert_eq!(
            decode_status(&status_payload(true)),
            Some(StatusFrame { tx_enabled: true })
        );
        assert_eq!(
            decode_status(&status_payload(false)),
            Some(StatusFrame { tx_enabled: false })
        );
    }

    #[test]
    fn test_decode_status_null_string_field() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&WSJTX_MAGIC.to_be_bytes());
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        write_qt_string(&mut buf, "JTDX");
        buf.extend_from_slice(&14_074_000u64.to_be_bytes());
        write_qt_string(&mut buf, "FT8");
        buf.extend_from_slice(&0xFFFFFFFFu32.to_be_bytes()); // dx call absent
        write_qt_string(&mut buf, "");
        write_qt_string(&mut buf, "FT8");
        buf.push(1);
        assert_eq!(decode_status(&buf), Some(StatusFrame { tx_enabled: true }));
    }

    #[test]
    fn test_decode_status_bad_magic() {
        let mut buf = status_payload(true);
        buf[0] = 0x00;
        assert_eq!(decode_status(&buf), None);
    }

    #[test]
    fn test_decode_status_wrong_type() {
        let mut buf = status_payload(true);
        buf[11] = 2; // Decode message
        assert_eq!(decode_status(&buf), None);
    }

    #[test]
    fn test_decode_status_truncated() {
        let buf = status_payload(true);
        for len in 0..buf.len() {
            assert_eq!(decode_status(&buf[..len]), None, "truncated at {}", len);
        }
    }

    #[test]
    fn test_scan_qso_start() {
        let event = scan_text(b"CQ 5Z4XB K1ABC", "5Z4XB", "FT8");
        assert_eq!(event.qso_start, Some("K1ABC".to_string()));
        assert!(!event.finished);
    }

    #[test]
    fn test_scan_is_case_insensitive() {
        let event = scan_text(b"cq 5z4xb k1abc", "5Z4XB", "FT8");
        assert_eq!(event.qso_start, Some("K1ABC".to_string()));
    }

    #[test]
    fn test_scan_substring_does_not_match() {
        // 5Z4XBX must not be mistaken for 5Z4XB
        let event = scan_text(b"CQ 5Z4XBX K1ABC", "5Z4XB", "FT8");
        assert!(event.is_empty());
    }

    #[test]
    fn test_scan_marker_is_not_a_partner() {
        // RR73 looks callsign-shaped but is a sign-off, not a station
        let event = scan_text(b"K1ABC 5Z4XB RR73", "5Z4XB", "FT8");
        assert_eq!(event.qso_start, None);
        assert!(event.finished);
    }

    #[test]
    fn test_scan_finish_markers() {
        for line in ["K1ABC RR73 5Z4XB", "5Z4XB K1ABC 73", "5Z4XB K1ABC R73"] {
            let event = scan_text(line.as_bytes(), "5Z4XB", "FT8");
            assert!(event.finished, "{:?}", line);
        }
    }

    #[test]
    fn test_scan_finish_requires_own_call() {
        let event = scan_text(b"K1ABC G0XYZ RR73", "5Z4XB", "FT8");
        assert!(!event.finished);
    }

    #[test]
    fn test_scan_own_cq() {
        let event = scan_text(b"FT8 CQ 5Z4XB KI88", "5Z4XB", "FT8");
        assert!(event.cq);

        // Mode tag after our call is someone else's announcement framing
        let event = scan_text(b"5Z4XB K1ABC FT8", "5Z4XB", "FT8");
        assert!(!event.cq);
    }

    #[test]
    fn test_scan_binary_frame_carries_text() {
        // A Status record embeds mode and callsign strings; the text scan
        // must see them through the binary framing.
        let mut buf = Vec::new();
        buf.extend_from_slice(&WSJTX_MAGIC.to_be_bytes());
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        write_qt_string(&mut buf, "JTDX");
        buf.extend_from_slice(&14_074_000u64.to_be_bytes());
        write_qt_string(&mut buf, "FT8");
        write_qt_string(&mut buf, "CQ 5Z4XB KI88");
        let event = scan_text(&buf, "5Z4XB", "FT8");
        assert!(event.cq);
    }

    #[test]
    fn test_valid_callsigns() {
        assert!(is_valid_callsign("K1ABC"));
        assert!(is_valid_callsign("5Z4XB"));
        assert!(is_valid_callsign("K7ACN/P"));
        assert!(!is_valid_callsign("CQ"));
        assert!(!is_valid_callsign("ABCDEF"));
        assert!(!is_valid_callsign("123456"));
    }
}
