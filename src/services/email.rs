use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::Config;

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailService {
    /// Returns None if SMTP is not fully configured.
    pub fn new(config: &Config) -> Option<Self> {
        let host = config.smtp_host.as_deref()?;
        let username = config.smtp_username.clone()?;
        let password = config.smtp_password.clone()?;
        let from_addr = config.smtp_from.as_deref()?;

        let port = config.smtp_port.unwrap_or(587);
        let creds = Credentials::new(username, password);

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        };

        let from: Mailbox = from_addr.parse().ok()?;

        Some(Self { transport, from })
    }

    // ─── Private helpers ─────────────────────────────────────────────────────

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    /// Wraps inner HTML content in the portal's email layout.
    fn wrap_html(portal_name: &str, content: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>{portal_name}</title>
</head>
<body style="margin:0;padding:0;background-color:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#f1f5f9;padding:40px 16px">
    <tr>
      <td align="center">
        <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="max-width:520px">
          <tr>
            <td align="center" style="padding-bottom:28px">
              <p style="margin:0;font-size:20px;font-weight:700;color:#0f172a;text-align:center">{portal_name}</p>
            </td>
          </tr>
          <tr>
            <td style="background:#ffffff;border-radius:12px;padding:40px;box-shadow:0 1px 3px rgba(0,0,0,0.08),0 8px 24px rgba(0,0,0,0.04)">
              {content}
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
        )
    }

    fn button(url: &str, label: &str) -> String {
        format!(
            r#"<table role="presentation" cellpadding="0" cellspacing="0" style="margin-bottom:28px">
  <tr>
    <td style="border-radius:8px;background:#2563eb">
      <a href="{url}" style="display:inline-block;padding:13px 28px;color:#ffffff;text-decoration:none;font-weight:600;font-size:15px;border-radius:8px">{label}</a>
    </td>
  </tr>
</table>"#
        )
    }

    fn mailbox(to_email: &str, to_name: &str) -> anyhow::Result<Mailbox> {
        format!("{to_name} <{to_email}>")
            .parse::<Mailbox>()
            .or_else(|_| to_email.parse::<Mailbox>())
            .with_context(|| format!("Invalid recipient address: {to_email}"))
    }

    async fn send_email(
        &self,
        from: Mailbox,
        to: Mailbox,
        subject: &str,
        text: &str,
        html: &str,
    ) -> anyhow::Result<()> {
        let email = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .context("Failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }

    // ─── Public methods ───────────────────────────────────────────────────────

    /// Email copy of an in-app notification.
    pub async fn send_notification(
        &self,
        to_email: &str,
        to_name: &str,
        subject: &str,
        message: &str,
        portal_name: &str,
        portal_url: &str,
    ) -> anyhow::Result<()> {
        let from = Mailbox::new(Some(portal_name.to_string()), self.from.email.clone());
        let to = Self::mailbox(to_email, to_name)?;

        let text = format!(
            "Hello {to_name},\n\n\
            {message}\n\n\
            Sign in to see the details: {portal_url}\n\n\
            {portal_name}"
        );

        let content = format!(
            r#"<h1 style="margin:0 0 8px 0;font-size:22px;font-weight:700;color:#0f172a">{subject}</h1>
<p style="margin:0 0 28px 0;font-size:15px;color:#64748b;line-height:1.6">Hello <strong style="color:#334155">{to_name}</strong>,<br><br>{message}</p>
{button}"#,
            button = Self::button(portal_url, "Open the portal"),
        );

        let html = Self::wrap_html(portal_name, &content);
        let subject = format!("{subject} — {portal_name}");
        self.send_email(from, to, &subject, &text, &html).await
    }

    pub async fn send_email_verification(
        &self,
        to_email: &str,
        to_name: &str,
        verify_url: &str,
        portal_name: &str,
    ) -> anyhow::Result<()> {
        let from = Mailbox::new(Some(portal_name.to_string()), self.from.email.clone());
        let to = Self::mailbox(to_email, to_name)?;

        let subject = format!("Confirm your email — {portal_name}");

        let text = format!(
            "Hello {to_name},\n\n\
            Welcome to {portal_name}. Confirm your email address with this link (valid 48 hours):\n\
            {verify_url}\n\n\
            If you did not sign up, ignore this email."
        );

        let content = format!(
            r#"<h1 style="margin:0 0 8px 0;font-size:22px;font-weight:700;color:#0f172a">Confirm your email</h1>
<p style="margin:0 0 28px 0;font-size:15px;color:#64748b;line-height:1.6">Hello <strong style="color:#334155">{to_name}</strong>,<br><br>Welcome to {portal_name}. Confirm your email address to continue your onboarding.</p>
{button}
<p style="margin:0;font-size:13px;color:#94a3b8;border-top:1px solid #f1f5f9;padding-top:20px;line-height:1.5">This link expires in <strong style="color:#64748b">48 hours</strong>. If you did not sign up, ignore this email.</p>"#,
            button = Self::button(verify_url, "Confirm my email"),
        );

        let html = Self::wrap_html(portal_name, &content);
        self.send_email(from, to, &subject, &text, &html).await
    }
}
