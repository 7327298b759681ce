use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{Delivery, MailTransport, OutgoingMessage};
use crate::error::MailError;

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Microsoft Graph `sendMail` for a single mailbox.
#[derive(Clone)]
pub struct GraphMailer {
    client: Client,
    api_url: String,
    access_token: String,
}

impl GraphMailer {
    pub fn new(client: Client, sender: &str, access_token: String) -> Self {
        Self {
            client,
            api_url: format!("{GRAPH_BASE_URL}/users/{sender}/sendMail"),
            access_token,
        }
    }
}

impl MailTransport for GraphMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailError> {
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.access_token)
            .json(&SendMailRequest::from(message))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Ok(Delivery::Accepted);
        }
        let body = resp.text().await.unwrap_or_default();
        Ok(Delivery::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Serialize)]
struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: GraphBody<'a>,
    to_recipients: Vec<GraphRecipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc_recipients: Vec<GraphRecipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc_recipients: Vec<GraphRecipient<'a>>,
    attachments: Vec<GraphAttachment<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient<'a> {
    email_address: GraphAddress<'a>,
}

#[derive(Serialize)]
struct GraphAddress<'a> {
    address: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment<'a> {
    #[serde(rename = "@odata.type")]
    odata_type: &'static str,
    name: &'a str,
    content_type: &'static str,
    content_bytes: &'a str,
}

impl<'a> From<&'a OutgoingMessage> for SendMailRequest<'a> {
    fn from(m: &'a OutgoingMessage) -> Self {
        let recipients = |list: &'a [String]| {
            list.iter()
                .map(|address| GraphRecipient {
                    email_address: GraphAddress { address: address.as_str() },
                })
                .collect()
        };

        Self {
            message: GraphMessage {
                subject: &m.subject,
                body: GraphBody {
                    content_type: "Text",
                    content: &m.body,
                },
                to_recipients: recipients(m.to.as_slice()),
                cc_recipients: recipients(m.cc.as_slice()),
                bcc_recipients: recipients(m.bcc.as_slice()),
                attachments: vec![GraphAttachment {
                    odata_type: "#microsoft.graph.fileAttachment",
                    name: &m.attachment.name,
                    content_type: "application/pdf",
                    content_bytes: &m.attachment.content_base64,
                }],
            },
        }
    }
}
