//! CSV report of a campaign's recipients.

use std::io;

use crate::recipient::Recipient;

pub const CSV_HEADER: [&str; 6] = ["name", "phone", "status", "sent_at", "read_at", "last_error"];

/// Stream the report to `writer`.
pub fn write_csv<'a, W: io::Write>(
    recipients: impl IntoIterator<Item = &'a Recipient>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CSV_HEADER)?;
    for r in recipients {
        let status = r.status().as_str().to_ascii_lowercase();
        let sent_at = r.sent_at().map(|t| t.to_rfc3339()).unwrap_or_default();
        let read_at = r.read_at().map(|t| t.to_rfc3339()).unwrap_or_default();
        out.write_record([
            r.name().unwrap_or_default(),
            r.phone(),
            status.as_str(),
            sent_at.as_str(),
            read_at.as_str(),
            r.last_error().unwrap_or_default(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// Render the report into a string.
pub fn export_csv<'a>(
    recipients: impl IntoIterator<Item = &'a Recipient>,
) -> Result<String, csv::Error> {
    let mut buf = Vec::new();
    write_csv(recipients, &mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use sendwave_core::CampaignId;

    use super::*;
    use crate::recipient::Contact;

    #[test]
    fn one_row_per_recipient_after_header() {
        let now = Utc::now();
        let campaign = CampaignId::new();
        let mut ok = Recipient::from_contact(campaign, &Contact::new(Some("Ada".into()), "+1"), now);
        ok.claim(now, Duration::minutes(10));
        ok.mark_sent(now).unwrap();
        let mut bad = Recipient::from_contact(campaign, &Contact::new(None, "+2"), now);
        bad.fail("number, not on network", now).unwrap();

        let csv = export_csv([&ok, &bad]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "name,phone,status,sent_at,read_at,last_error");
        assert!(lines[1].starts_with("Ada,+1,sent,"));
        assert!(lines[2].contains("+2,failed,"));
        assert!(lines[2].ends_with("\"number, not on network\""));
    }
}
