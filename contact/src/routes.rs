use rocket::{
    form::Form,
    http::Status,
    request::FlashMessage,
    response::{content::RawHtml, Flash, Redirect},
    State,
};

use crate::{
    jobs::SendContactEmail,
    validate::{ContactForm, ValidationError},
    AppState,
};

pub const SENT: &str = "Your message has been sent!";
const UNAVAILABLE: &str = "Your message could not be sent right now. Please try again later.";

#[derive(Responder)]
pub enum SendResponse {
    Sent(Flash<Redirect>),
    #[response(status = 422)]
    Invalid(RawHtml<String>),
    #[response(status = 503)]
    Unavailable(RawHtml<String>),
}

#[get("/contact")]
pub fn show_form(flash: Option<FlashMessage<'_>>) -> RawHtml<String> {
    let notice = flash.map(|flash| (flash.kind().to_string(), flash.message().to_string()));

    RawHtml(render(&ContactForm::default(), None, notice))
}

#[post("/contact", data = "<form>")]
#[tracing::instrument(skip_all)]
pub async fn send_message(form: Form<ContactForm>, state: &State<AppState>) -> SendResponse {
    let fields = match state.validator.validate(&form) {
        Ok(fields) => fields,
        Err(errors) => {
            tracing::debug!(fields = ?errors.iter().map(|(f, _)| f).collect::<Vec<_>>(), "rejected contact form");
            return SendResponse::Invalid(RawHtml(render(&form, Some(&errors), None)));
        }
    };

    match state.jobs.enqueue(SendContactEmail { data: fields }).await {
        Ok(id) => {
            tracing::info!(job_id = %id, "queued contact email");
            SendResponse::Sent(Flash::success(Redirect::to(uri!(show_form)), SENT))
        }
        Err(e) => {
            tracing::error!("unable to queue contact email: {}", e);
            let notice = Some(("error".to_string(), UNAVAILABLE.to_string()));
            SendResponse::Unavailable(RawHtml(render(&form, None, notice)))
        }
    }
}

#[get("/metrics")]
pub fn metrics() -> Result<String, Status> {
    courier::metrics::output().map_err(|e| {
        tracing::error!("unable to encode metrics: {}", e);
        Status::InternalServerError
    })
}

fn render(old: &ContactForm, errors: Option<&ValidationError>, notice: Option<(String, String)>) -> String {
    let notice = notice
        .map(|(kind, message)| {
            format!(
                r#"<p class="notice {}">{}</p>"#,
                escape_html(&kind),
                escape_html(&message)
            )
        })
        .unwrap_or_default();
    let error = |field: &str| {
        errors
            .and_then(|errors| errors.get(field))
            .map(|message| format!(r#"<span class="error">{}</span>"#, escape_html(message)))
            .unwrap_or_default()
    };
    let value = |input: &Option<String>| escape_html(input.as_deref().unwrap_or_default());

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Contact</title></head>
<body>
<h1>Contact us</h1>
{notice}
<form method="post" action="/contact">
  <label>Name <input type="text" name="name" value="{name}"></label>
  {name_error}
  <label>Email <input type="email" name="email" value="{email}"></label>
  {email_error}
  <label>Message <textarea name="message">{message}</textarea></label>
  {message_error}
  <button type="submit">Send</button>
</form>
</body>
</html>
"#,
        notice = notice,
        name = value(&old.name),
        name_error = error("name"),
        email = value(&old.email),
        email_error = error("email"),
        message = value(&old.message),
        message_error = error("message"),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            "&lt;b onclick=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/b&gt;",
            escape_html(r#"<b onclick="x">Tom & Jerry's</b>"#)
        );
    }

    #[test]
    fn form_keeps_old_input() {
        let old = ContactForm {
            name: Some("<Jane>".into()),
            email: None,
            message: Some("Hi".into()),
        };

        let html = render(&old, None, None);

        assert!(html.contains(r#"value="&lt;Jane&gt;""#));
        assert!(html.contains("<textarea name=\"message\">Hi</textarea>"));
    }
}
