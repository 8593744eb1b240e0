use crate::error::KeyserverError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
  pub name: String,
  pub email: Option<String>,
  pub mobile: Option<String>,
}

impl VCard {
  pub fn to_vcf(&self) -> String {
    let mut out = String::from("BEGIN:VCARD\r\nVERSION:3.0\r\n");
    out.push_str(&format!("FN:{}\r\n", escape(&self.name)));
    if let Some(email) = &self.email {
      out.push_str(&format!("EMAIL:{}\r\n", escape(email)));
    }
    if let Some(mobile) = &self.mobile {
      out.push_str(&format!("TEL;TYPE=MOBILE:{}\r\n", escape(mobile)));
    }
    out.push_str("END:VCARD\r\n");
    out
  }

  pub fn parse(text: &str) -> Result<Self, KeyserverError> {
    let mut lines = unfold(text).into_iter().filter(|l| !l.trim().is_empty());

    match lines.next() {
      Some(l) if l.trim().eq_ignore_ascii_case("BEGIN:VCARD") => {}
      _ => return Err(KeyserverError::Decode("vcard must start with BEGIN:VCARD".to_string())),
    }

    let mut card = VCard::default();
    let mut name = None;
    let mut ended = false;

    for line in lines {
      let Some((prop, value)) = line.split_once(':') else {
        return Err(KeyserverError::Decode(format!("malformed vcard line: {line}")));
      };
      let mut params = prop.split(';');
      let key = params.next().unwrap_or_default().to_ascii_uppercase();
      match key.as_str() {
        "END" => {
          ended = true;
          break;
        }
        "FN" => name = Some(unescape(value)),
        "EMAIL" => card.email = Some(unescape(value)),
        "TEL" => {
          let mobile = params.any(|p| {
            let p = p.to_ascii_uppercase();
            p.contains("MOBILE") || p.contains("CELL")
          });
          if mobile || card.mobile.is_none() {
            card.mobile = Some(unescape(value));
          }
        }
        _ => {}
      }
    }

    if !ended {
      return Err(KeyserverError::Decode("vcard missing END:VCARD".to_string()));
    }
    card.name = name.ok_or_else(|| KeyserverError::Decode("vcard missing FN".to_string()))?;
    Ok(card)
  }
}

// RFC 6350 line folding: a line starting with whitespace continues the previous one.
fn unfold(text: &str) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for raw in text.split('\n') {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    if let Some(rest) = line.strip_prefix([' ', '\t']) {
      if let Some(last) = out.last_mut() {
        last.push_str(rest);
        continue;
      }
    }
    out.push(line.to_string());
  }
  out
}

fn escape(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      ',' => out.push_str("\\,"),
      ';' => out.push_str("\\;"),
      '\n' => out.push_str("\\n"),
      '\r' => {}
      _ => out.push(c),
    }
  }
  out
}

fn unescape(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') | Some('N') => out.push('\n'),
      Some(other) => out.push(other),
      None => out.push('\\'),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn vcf_output_is_parseable() {
    let card = VCard {
      name: "Satoshi, N".to_string(),
      email: Some("s@example.org".to_string()),
      mobile: Some("+1 555 0100".to_string()),
    };
    let text = card.to_vcf();
    assert!(text.contains("TEL;TYPE=MOBILE:+1 555 0100\r\n"));
    assert!(text.contains("FN:Satoshi\\, N\r\n"));
    assert_eq!(VCard::parse(&text).unwrap(), card);
  }

  #[test]
  fn parse_handles_folding_and_lowercase() {
    let text = "begin:vcard\nversion:3.0\nfn:Long\n  Name\ntel;type=cell:123\nend:vcard\n";
    let card = VCard::parse(text).unwrap();
    assert_eq!(card.name, "Long Name");
    assert_eq!(card.mobile.as_deref(), Some("123"));
    assert!(card.email.is_none());
  }

  #[test]
  fn parse_requires_name_and_envelope() {
    assert!(VCard::parse("BEGIN:VCARD\nEMAIL:a@b\nEND:VCARD\n").is_err());
    assert!(VCard::parse("FN:x\n").is_err());
    assert!(VCard::parse("BEGIN:VCARD\nFN:x\n").is_err());
  }
}
