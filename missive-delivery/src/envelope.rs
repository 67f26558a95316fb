//! MIME construction for outbound mail.

use lettre::{
    Message,
    message::{
        Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart, header::ContentType,
    },
};
use missive_common::{Address, Attachment, Email};

use crate::error::EnvelopeError;

/// Builds the wire form of an email addressed to exactly one recipient.
pub trait EnvelopeBuilder: Send + Sync {
    fn build(&self, email: &Email, recipient: &Address) -> Result<Vec<u8>, EnvelopeError>;
}

/// [`EnvelopeBuilder`] backed by `lettre`'s message builder.
///
/// Without attachments the message is a single text or HTML part. With
/// them it becomes `multipart/mixed`; inline resources are kept next to the
/// body in a `multipart/related` part and referenced by their filename as
/// the content id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LettreEnvelopeBuilder;

fn mailbox(address: &Address) -> Result<Mailbox, EnvelopeError> {
    let parsed = address
        .address
        .parse()
        .map_err(|source| EnvelopeError::Address {
            address: address.address.clone(),
            source,
        })?;

    let name = (!address.name.is_empty()).then(|| address.name.clone());
    Ok(Mailbox::new(name, parsed))
}

fn content_type(attachment: &Attachment) -> Result<ContentType, EnvelopeError> {
    ContentType::parse(&attachment.content_type).map_err(|_| EnvelopeError::ContentType {
        content_type: attachment.content_type.clone(),
        filename: attachment.filename.clone(),
    })
}

fn part(attachment: &Attachment) -> Result<SinglePart, EnvelopeError> {
    let builder = if attachment.inline {
        MimeAttachment::new_inline_with_name(
            attachment.filename.clone(),
            attachment.filename.clone(),
        )
    } else {
        MimeAttachment::new(attachment.filename.clone())
    };

    Ok(builder.body(attachment.data.clone(), content_type(attachment)?))
}

fn body(email: &Email) -> SinglePart {
    if email.html {
        SinglePart::html(email.content.clone())
    } else {
        SinglePart::plain(email.content.clone())
    }
}

impl EnvelopeBuilder for LettreEnvelopeBuilder {
    fn build(&self, email: &Email, recipient: &Address) -> Result<Vec<u8>, EnvelopeError> {
        let builder = Message::builder()
            .from(mailbox(&email.from)?)
            .to(mailbox(recipient)?)
            .subject(email.subject.clone());

        if email.attachments.is_empty() {
            return Ok(builder.singlepart(body(email))?.formatted());
        }

        let (inline, downloads): (Vec<_>, Vec<_>) =
            email.attachments.iter().partition(|attachment| attachment.inline);

        let mut mixed = if inline.is_empty() {
            MultiPart::mixed().singlepart(body(email))
        } else {
            let mut related = MultiPart::related().singlepart(body(email));
            for attachment in inline {
                related = related.singlepart(part(attachment)?);
            }
            MultiPart::mixed().multipart(related)
        };

        for attachment in downloads {
            mixed = mixed.singlepart(part(attachment)?);
        }

        Ok(builder.multipart(mixed)?.formatted())
    }
}
