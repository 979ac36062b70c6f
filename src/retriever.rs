//! Selects the message feeding a frame and extracts its image and caption.

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::error::RetrieveError;
use crate::mailbox::MailProvider;
use crate::models::{FrameType, MailMessage, RetrievedMessage};

/// Provider search for inbox mail carrying attachments.
pub const ATTACHMENT_QUERY: &str = "in:inbox has:attachment";

#[derive(Debug, Clone)]
pub struct MailRetriever {
    earth_sender: String,
    max_messages: u32,
}

impl MailRetriever {
    pub fn new(earth_sender: impl Into<String>, max_messages: u32) -> Self {
        Self {
            earth_sender: earth_sender.into().trim().to_ascii_lowercase(),
            max_messages,
        }
    }

    /// Whether a `From` header belongs to the earth sender.
    pub fn is_earth_sender(&self, from: &str) -> bool {
        !self.earth_sender.is_empty() && sender_address(from) == self.earth_sender
    }

    pub fn accepts(&self, frame: FrameType, from: &str) -> bool {
        match frame {
            FrameType::SatelliteFrame => !self.is_earth_sender(from),
            FrameType::EarthFrame => self.is_earth_sender(from),
        }
    }

    /// Provider search for `frame`. The sender split happens server-side so
    /// the listing window only holds candidates. `None` when nothing can
    /// match.
    pub fn query(&self, frame: FrameType) -> Option<String> {
        match (frame, self.earth_sender.is_empty()) {
            (FrameType::EarthFrame, true) => None,
            (FrameType::SatelliteFrame, true) => Some(ATTACHMENT_QUERY.to_string()),
            (FrameType::EarthFrame, false) => {
                Some(format!("{ATTACHMENT_QUERY} from:{}", self.earth_sender))
            }
            (FrameType::SatelliteFrame, false) => {
                Some(format!("{ATTACHMENT_QUERY} -from:{}", self.earth_sender))
            }
        }
    }

    /// The newest image-bearing message for `frame`, or `None` if no
    /// message qualifies.
    pub async fn retrieve(
        &self,
        frame: FrameType,
        mailbox: &dyn MailProvider,
    ) -> Result<Option<RetrievedMessage>, RetrieveError> {
        let Some(query) = self.query(frame) else {
            info!(%frame, "earth sender not configured, nothing to list");
            return Ok(None);
        };
        let ids = mailbox.list_messages(&query, self.max_messages).await?;
        let messages = try_join_all(ids.iter().map(|id| mailbox.get_message(id))).await?;

        let Some(selected) = self.select(frame, messages) else {
            info!(%frame, "no matching message");
            return Ok(None);
        };

        let attachment = selected
            .first_image()
            .ok_or_else(|| RetrieveError::Unexpected("selected message lost its image".to_string()))?;
        let bytes = match (&attachment.inline_data, &attachment.attachment_id) {
            (Some(data), _) => data.clone(),
            (None, Some(attachment_id)) => mailbox.get_attachment(&selected.id, attachment_id).await?,
            (None, None) => {
                return Err(RetrieveError::Unexpected(format!(
                    "image attachment in message {} has no data",
                    selected.id
                )));
            }
        };
        let image = image::load_from_memory(&bytes)?;

        info!(%frame, message_id = %selected.id, "selected message");
        Ok(Some(RetrievedMessage {
            message_id: selected.id,
            sender: selected.sender.unwrap_or_default(),
            caption_text: selected.body_plain.unwrap_or_default().trim().to_string(),
            image,
        }))
    }

    /// Keeps classified, image-bearing messages and picks the most recent.
    /// Equal timestamps keep provider order.
    fn select(&self, frame: FrameType, messages: Vec<MailMessage>) -> Option<MailMessage> {
        let mut candidates: Vec<MailMessage> = messages
            .into_iter()
            .filter(|m| {
                let from = m.sender.as_deref().unwrap_or_default();
                let keep = self.accepts(frame, from) && m.first_image().is_some();
                debug!(message_id = %m.id, from, keep, "classified message");
                keep
            })
            .collect();

        candidates.sort_by(|a, b| b.internal_date.cmp(&a.internal_date));
        candidates.into_iter().next()
    }
}

/// Lowercased address from a `From` header such as `Name <a@b.c>`.
pub fn sender_address(from: &str) -> String {
    let address = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };
    address.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentRef;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const EARTH: &str = "home@example.com";

    #[derive(Default)]
    struct FakeMailbox {
        messages: Vec<MailMessage>,
        attachments: HashMap<String, Vec<u8>>,
        fail_listing: bool,
        last_query: std::sync::Mutex<Option<String>>,
    }

    /// Applies the `from:` and `-from:` terms of a search the way the
    /// provider does.
    fn matches_from_terms(query: &str, from: &str) -> bool {
        let address = sender_address(from);
        query.split_whitespace().all(|term| {
            if let Some(wanted) = term.strip_prefix("-from:") {
                address != wanted
            } else if let Some(wanted) = term.strip_prefix("from:") {
                address == wanted
            } else {
                true
            }
        })
    }

    #[async_trait]
    impl MailProvider for FakeMailbox {
        async fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>, RetrieveError> {
            if self.fail_listing {
                return Err(RetrieveError::Provider("quota exceeded".to_string()));
            }
            *self.last_query.lock().unwrap() = Some(query.to_string());
            Ok(self
                .messages
                .iter()
                .filter(|m| matches_from_terms(query, m.sender.as_deref().unwrap_or_default()))
                .take(max_results as usize)
                .map(|m| m.id.clone())
                .collect())
        }

        async fn get_message(&self, id: &str) -> Result<MailMessage, RetrieveError> {
            self.messages
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| RetrieveError::Provider(format!("no message {id}")))
        }

        async fn get_attachment(&self, _message_id: &str, attachment_id: &str) -> Result<Vec<u8>, RetrieveError> {
            self.attachments
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| RetrieveError::Provider(format!("no attachment {attachment_id}")))
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 3, image::Rgb([10, 200, 30]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn message(id: &str, from: &str, date: i64, body: &str) -> MailMessage {
        MailMessage {
            id: id.to_string(),
            sender: Some(from.to_string()),
            subject: None,
            internal_date: date,
            body_plain: Some(body.to_string()),
            attachments: vec![AttachmentRef {
                attachment_id: Some(format!("{id}-att")),
                mime_type: "image/png".to_string(),
                ..Default::default()
            }],
        }
    }

    fn mailbox(messages: Vec<MailMessage>) -> FakeMailbox {
        let attachments = messages
            .iter()
            .map(|m| (format!("{}-att", m.id), png_bytes()))
            .collect();
        FakeMailbox {
            messages,
            attachments,
            ..Default::default()
        }
    }

    fn retriever() -> MailRetriever {
        MailRetriever::new("Home@Example.com", 25)
    }

    #[test]
    fn sender_address_strips_display_name() {
        assert_eq!(sender_address("Home <HOME@example.com>"), "home@example.com");
        assert_eq!(sender_address(" home@example.com "), "home@example.com");
    }

    #[test]
    fn classification_is_exclusive() {
        let r = retriever();
        for from in [EARTH, "Family <home@example.com>", "friend@example.org", ""] {
            assert_ne!(
                r.accepts(FrameType::SatelliteFrame, from),
                r.accepts(FrameType::EarthFrame, from),
                "{from}"
            );
        }
        assert!(r.accepts(FrameType::EarthFrame, "Family <home@example.com>"));
        assert!(r.accepts(FrameType::SatelliteFrame, "friend@example.org"));
    }

    #[test]
    fn empty_earth_sender_matches_nobody() {
        let r = MailRetriever::new("", 25);
        assert!(!r.accepts(FrameType::EarthFrame, ""));
        assert!(r.accepts(FrameType::SatelliteFrame, ""));
    }

    #[test]
    fn query_splits_senders_at_the_provider() {
        let r = retriever();
        assert_eq!(
            r.query(FrameType::EarthFrame).as_deref(),
            Some("in:inbox has:attachment from:home@example.com")
        );
        assert_eq!(
            r.query(FrameType::SatelliteFrame).as_deref(),
            Some("in:inbox has:attachment -from:home@example.com")
        );

        let unset = MailRetriever::new("", 25);
        assert_eq!(unset.query(FrameType::EarthFrame), None);
        assert_eq!(unset.query(FrameType::SatelliteFrame).as_deref(), Some(ATTACHMENT_QUERY));
    }

    #[tokio::test]
    async fn earth_message_found_behind_a_full_window_of_other_mail() {
        let mut messages: Vec<MailMessage> = (0..25)
            .map(|i| message(&format!("sat-{i}"), "friend@example.org", 1000 - i, ""))
            .collect();
        messages.push(message("earth", EARTH, 10, "from home"));
        let mb = mailbox(messages);

        let got = retriever().retrieve(FrameType::EarthFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "earth");
        assert_eq!(
            mb.last_query.lock().unwrap().as_deref(),
            Some("in:inbox has:attachment from:home@example.com")
        );

        let got = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "sat-0");
    }

    #[tokio::test]
    async fn unset_earth_sender_skips_listing() {
        let mb = mailbox(vec![message("m1", "friend@example.org", 100, "")]);
        let r = MailRetriever::new("", 25);

        assert!(r.retrieve(FrameType::EarthFrame, &mb).await.unwrap().is_none());
        assert!(mb.last_query.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn satellite_never_selects_earth_mail() {
        let mb = mailbox(vec![
            message("m1", EARTH, 300, "from home"),
            message("m2", "friend@example.org", 100, "from afar"),
        ]);

        let got = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "m2");
        assert_eq!(got.caption_text, "from afar");

        let got = retriever().retrieve(FrameType::EarthFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "m1");
    }

    #[tokio::test]
    async fn newest_message_wins_regardless_of_provider_order() {
        let mb = mailbox(vec![
            message("old", "a@example.org", 100, ""),
            message("new", "b@example.org", 500, ""),
            message("mid", "c@example.org", 300, ""),
        ]);

        let got = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "new");
        assert_eq!(got.caption_text, "");
    }

    #[tokio::test]
    async fn equal_timestamps_keep_provider_order() {
        let mb = mailbox(vec![
            message("first", "a@example.org", 100, ""),
            message("second", "b@example.org", 100, ""),
        ]);

        let got = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "first");
    }

    #[tokio::test]
    async fn messages_without_images_are_skipped() {
        let mut pdf_only = message("pdf", "a@example.org", 900, "");
        pdf_only.attachments[0].mime_type = "application/pdf".to_string();
        let mb = mailbox(vec![pdf_only, message("img", "b@example.org", 100, "")]);

        let got = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.message_id, "img");
    }

    #[tokio::test]
    async fn no_match_is_none() {
        let mb = mailbox(vec![message("m1", "friend@example.org", 100, "")]);
        assert!(retriever().retrieve(FrameType::EarthFrame, &mb).await.unwrap().is_none());

        let empty = FakeMailbox::default();
        assert!(retriever().retrieve(FrameType::SatelliteFrame, &empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inline_data_skips_attachment_fetch() {
        let mut m = message("m1", "friend@example.org", 100, "");
        m.attachments[0].attachment_id = None;
        m.attachments[0].inline_data = Some(png_bytes());
        let mb = FakeMailbox {
            messages: vec![m],
            ..Default::default()
        };

        let got = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap().unwrap();
        assert_eq!(got.image.width(), 4);
    }

    #[tokio::test]
    async fn undecodable_image_is_decode_error() {
        let mut mb = mailbox(vec![message("m1", "friend@example.org", 100, "")]);
        mb.attachments.insert("m1-att".to_string(), b"definitely not a png".to_vec());

        let err = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap_err();
        assert!(matches!(err, RetrieveError::AttachmentDecode(_)));
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let mb = FakeMailbox {
            fail_listing: true,
            ..Default::default()
        };
        let err = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap_err();
        assert!(matches!(err, RetrieveError::Provider(_)));
    }

    #[tokio::test]
    async fn missing_attachment_data_is_unexpected() {
        let mut m = message("m1", "friend@example.org", 100, "");
        m.attachments[0].attachment_id = None;
        let mb = FakeMailbox {
            messages: vec![m],
            ..Default::default()
        };

        let err = retriever().retrieve(FrameType::SatelliteFrame, &mb).await.unwrap_err();
        assert!(matches!(err, RetrieveError::Unexpected(_)));
    }
}
