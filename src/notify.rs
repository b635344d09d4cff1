use async_trait::async_trait;
use tera::Context;
use tracing::{info, warn};

use crate::clock::Zone;
use crate::model::{Booking, ReminderKind};
use crate::templates;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    /// E.164.
    pub to: String,
    pub body: String,
}

/// Outbound email and SMS. Best-effort: report failure, never raise.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, msg: &EmailMessage) -> bool;
    async fn send_sms(&self, msg: &SmsMessage) -> bool;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, msg: &EmailMessage) -> bool {
        info!(to = %msg.to, subject = %msg.subject, "email (log delivery)\n{}", msg.html_body);
        true
    }

    async fn send_sms(&self, msg: &SmsMessage) -> bool {
        info!(to = %msg.to, "sms (log delivery): {}", msg.body);
        true
    }
}

/// Normalize a phone number to E.164.
///
/// `+`-prefixed numbers pass through; a ten-digit national number with a
/// leading `0` gets `country_code`; anything else is returned as-is.
pub fn normalize_phone(raw: &str, country_code: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();
    if compact.starts_with('+') {
        return compact;
    }
    if compact.len() == 10 && compact.starts_with('0') && compact.chars().all(|c| c.is_ascii_digit())
    {
        return format!("+{country_code}{}", &compact[1..]);
    }
    warn!("phone number {raw:?} may not be E.164; sending as-is");
    compact
}

// ── Message builders ─────────────────────────────────────

pub fn confirmation_request_email(
    booking: &Booking,
    zone: &Zone,
    confirm_url: &str,
) -> Result<EmailMessage, tera::Error> {
    let mut ctx = Context::new();
    ctx.insert("name", booking.contact.first_name());
    ctx.insert("when", &zone.format_human(booking.start_time));
    ctx.insert("confirm_url", confirm_url);
    Ok(EmailMessage {
        to: booking.contact.email.clone(),
        subject: "Please confirm your appointment".to_string(),
        html_body: templates::render(templates::CONFIRMATION_REQUEST, &ctx)?,
    })
}

pub fn booking_confirmed_email(booking: &Booking, zone: &Zone) -> Result<EmailMessage, tera::Error> {
    let mut ctx = Context::new();
    ctx.insert("name", booking.contact.first_name());
    ctx.insert("when", &zone.format_human(booking.start_time));
    Ok(EmailMessage {
        to: booking.contact.email.clone(),
        subject: "Your appointment is confirmed".to_string(),
        html_body: templates::render(templates::BOOKING_CONFIRMED, &ctx)?,
    })
}

/// `None` when the booking has no phone number.
pub fn booking_confirmed_sms(booking: &Booking, zone: &Zone, country_code: &str) -> Option<SmsMessage> {
    let phone = booking.contact.phone.as_deref()?;
    Some(SmsMessage {
        to: normalize_phone(phone, country_code),
        body: format!(
            "Hi {}, your call is confirmed for {}. You'll also receive an email and calendar invite. See you then!",
            booking.contact.first_name(),
            zone.format_human(booking.start_time),
        ),
    })
}

/// `None` when the booking has no phone number.
pub fn reminder_sms(
    booking: &Booking,
    kind: ReminderKind,
    zone: &Zone,
    country_code: &str,
) -> Option<SmsMessage> {
    let phone = booking.contact.phone.as_deref()?;
    let name = booking.contact.first_name();
    let time = zone.format_time(booking.start_time);
    let body = match kind {
        ReminderKind::DayBefore => {
            format!("Hi {name}, a reminder that your call is tomorrow at {time}.")
        }
        ReminderKind::MorningOf => {
            format!("Good morning {name}! Your call is today at {time}. Talk soon.")
        }
        ReminderKind::HourBefore => {
            format!("Hi {name}, your call starts in about an hour, at {time}.")
        }
    };
    Some(SmsMessage {
        to: normalize_phone(phone, country_code),
        body,
    })
}
