//! The message model shared by the inbound and outbound pipelines.
//!
//! These shapes are also the JSON wire format accepted by the ingestion
//! endpoint, so field names are fixed and unknown fields are refused.

use serde::{Deserialize, Serialize};

use crate::error::{AddressError, AttachmentError, ValidationError};

const MAX_ADDRESS_LEN: usize = 128;
const MAX_NAME_LEN: usize = 128;
const MAX_ATTACHMENT_FIELD_LEN: usize = 255;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Address {
    #[serde(default)]
    pub name: String,
    pub address: String,
}

impl Address {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// The part of the address after the `@`, if there is one.
    pub fn domain(&self) -> Option<&str> {
        self.address
            .split_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }

    /// Checks the display name and address against the ingestion limits.
    pub fn validate(&self) -> Result<(), AddressError> {
        let name_len = self.name.chars().count();
        if !(1..=MAX_NAME_LEN).contains(&name_len) {
            return Err(AddressError::NameLength(name_len));
        }

        let address_len = self.address.chars().count();
        if address_len > MAX_ADDRESS_LEN {
            return Err(AddressError::TooLong(address_len));
        }

        if !is_mailbox(&self.address) {
            return Err(AddressError::Invalid(self.address.clone()));
        }

        Ok(())
    }
}

/// A bare `local@domain` mailbox, without display name or angle brackets.
fn is_mailbox(address: &str) -> bool {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };

    if local.is_empty()
        || domain.is_empty()
        || address.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return false;
    }

    let domain_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    });

    domain_ok
        && mailparse::addrparse(address)
            .ok()
            .and_then(|list| list.extract_single_info())
            .is_some_and(|single| single.addr == address)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attachment {
    pub content_type: String,
    pub filename: String,
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
    /// Referenced from the body (`Content-ID`) rather than offered as a download.
    #[serde(default)]
    pub inline: bool,
}

impl Attachment {
    pub fn new(
        content_type: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            filename: filename.into(),
            data: data.into(),
            inline: false,
        }
    }

    #[must_use]
    pub const fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    pub fn validate(&self) -> Result<(), AttachmentError> {
        if self.content_type.is_empty() {
            return Err(AttachmentError::MissingContentType);
        }
        if self.content_type.len() > MAX_ATTACHMENT_FIELD_LEN {
            return Err(AttachmentError::ContentTypeTooLong(self.content_type.len()));
        }
        if self.filename.is_empty() {
            return Err(AttachmentError::MissingFilename);
        }
        if self.filename.len() > MAX_ATTACHMENT_FIELD_LEN {
            return Err(AttachmentError::FilenameTooLong(self.filename.len()));
        }
        if self.data.is_empty() {
            return Err(AttachmentError::EmptyData);
        }

        Ok(())
    }
}

/// A message, either produced by the inbound pipeline or submitted for delivery.
///
/// `content` is the HTML body when `html` is set and the plain-text body
/// otherwise; a message never carries both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Email {
    pub to: Vec<Address>,
    pub from: Address,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub html: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// A plain-text message with no attachments.
    pub fn text(
        from: Address,
        to: Vec<Address>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            to,
            from,
            subject: subject.into(),
            content: content.into(),
            html: false,
            attachments: Vec::new(),
        }
    }

    /// An HTML message with no attachments.
    pub fn html(
        from: Address,
        to: Vec<Address>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            html: true,
            ..Self::text(from, to, subject, content)
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Runs the ingestion checks: at least one recipient, well formed
    /// addresses, and complete attachments.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.is_empty() {
            return Err(ValidationError::NoRecipients);
        }

        for (index, recipient) in self.to.iter().enumerate() {
            recipient
                .validate()
                .map_err(|reason| ValidationError::Recipient { index, reason })?;
        }

        self.from.validate().map_err(ValidationError::Sender)?;

        for (index, attachment) in self.attachments.iter().enumerate() {
            attachment
                .validate()
                .map_err(|reason| ValidationError::Attachment { index, reason })?;
        }

        Ok(())
    }
}

mod base64_data {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
