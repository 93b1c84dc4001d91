use std::sync::Arc;

use courier::{field, BackgroundJob, JobParameter, Payload, PayloadError};

use crate::{mail::Mailer, validate::ContactFields};

/// Shared by every job execution.
pub struct JobContext {
    pub mailer: Arc<dyn Mailer>,
    /// Where contact messages are delivered.
    pub admin_address: String,
}

/// Forward a contact message to the site administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendContactEmail {
    pub data: ContactFields,
}

impl JobParameter for SendContactEmail {
    const JOB_TYPE: &'static str = "send_contact_email";

    fn to_payload(&self) -> Payload {
        Payload::from([
            ("name".to_string(), self.data.name.clone()),
            ("email".to_string(), self.data.email.clone()),
            ("message".to_string(), self.data.message.clone()),
        ])
    }

    fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        Ok(Self {
            data: ContactFields {
                name: field(payload, "name")?,
                email: field(payload, "email")?,
                message: field(payload, "message")?,
            },
        })
    }
}

#[async_trait::async_trait]
impl BackgroundJob<JobContext> for SendContactEmail {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let subject = format!("New Contact from {}", self.data.name);

        ctx.mailer
            .send(&ctx.admin_address, &subject, &self.data.message)
            .await?;

        tracing::info!(to = %ctx.admin_address, from = %self.data.email, "contact email sent");
        Ok(())
    }
}
