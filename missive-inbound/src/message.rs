//! Turning a parsed MIME tree into an [`Email`].

use mailparse::{
    DispositionType, MailAddr, MailHeaderMap, MailParseError, ParsedMail, addrparse,
};
use missive_common::{Address, Attachment, Email};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("incoming email is invalid or malformed: {0}")]
    Malformed(#[from] MailParseError),

    #[error("incoming email contains an invalid 'To' header: {0}")]
    To(String),

    #[error("incoming email contains an invalid 'From' header: {0}")]
    From(String),
}

/// Every address in the `To` header, groups flattened.
pub fn recipients(mail: &ParsedMail<'_>) -> Result<Vec<Address>, MessageError> {
    let header = mail.headers.get_first_value("To").unwrap_or_default();
    let list = addrparse(&header).map_err(|err| MessageError::To(err.to_string()))?;

    let recipients = list
        .iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(info) => vec![info.clone()],
            MailAddr::Group(group) => group.addrs.clone(),
        })
        .map(|info| Address::new(info.display_name.unwrap_or_default(), info.addr))
        .collect::<Vec<_>>();

    if recipients.is_empty() {
        return Err(MessageError::To("no address".to_string()));
    }

    Ok(recipients)
}

/// The single address in the `From` header.
pub fn sender(mail: &ParsedMail<'_>) -> Result<Address, MessageError> {
    let header = mail.headers.get_first_value("From").unwrap_or_default();
    let info = addrparse(&header)
        .map_err(|err| MessageError::From(err.to_string()))?
        .extract_single_info()
        .ok_or_else(|| MessageError::From(format!("expected a single address, got '{header}'")))?;

    Ok(Address::new(info.display_name.unwrap_or_default(), info.addr))
}

#[derive(Default)]
struct Parts {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    inlines: Vec<Attachment>,
}

impl Parts {
    fn walk(&mut self, part: &ParsedMail<'_>) -> Result<(), MessageError> {
        if !part.subparts.is_empty() {
            return part
                .subparts
                .iter()
                .try_for_each(|subpart| self.walk(subpart));
        }

        let disposition = part.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned();
        let content_id = part
            .headers
            .get_first_value("Content-ID")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string());
        let mimetype = part.ctype.mimetype.as_str();
        let is_text = mimetype == "text/plain" || mimetype == "text/html";

        match disposition.disposition {
            DispositionType::Attachment => {
                self.attachments.push(attachment(part, filename, false)?);
            }
            DispositionType::Inline if filename.is_some() || content_id.is_some() => {
                self.inlines
                    .push(attachment(part, filename.or(content_id), true)?);
            }
            _ if !is_text && filename.is_some() => {
                self.attachments.push(attachment(part, filename, false)?);
            }
            _ if mimetype == "text/html" && self.html.is_none() => {
                self.html = Some(part.get_body()?);
            }
            _ if mimetype == "text/plain" && self.text.is_none() => {
                self.text = Some(part.get_body()?);
            }
            _ => {}
        }

        Ok(())
    }
}

fn attachment(
    part: &ParsedMail<'_>,
    filename: Option<String>,
    inline: bool,
) -> Result<Attachment, MessageError> {
    Ok(Attachment {
        content_type: part.ctype.mimetype.clone(),
        filename: filename.unwrap_or_default(),
        data: part.get_body_raw()?,
        inline,
    })
}

/// Maps a parsed message onto an [`Email`]. The body is the first HTML part
/// when there is one and the first plain text part otherwise; attachments
/// come before inline resources.
pub fn to_email(
    mail: &ParsedMail<'_>,
    from: Address,
    to: Vec<Address>,
) -> Result<Email, MessageError> {
    let mut parts = Parts::default();
    parts.walk(mail)?;

    let (content, html) = match (parts.html, parts.text) {
        (Some(html), _) => (html, true),
        (None, text) => (text.unwrap_or_default(), false),
    };

    let mut attachments = parts.attachments;
    attachments.append(&mut parts.inlines);

    Ok(Email {
        to,
        from,
        subject: mail.headers.get_first_value("Subject").unwrap_or_default(),
        content,
        html,
        attachments,
    })
}
