//! HTML for outbound email and the confirmation-link pages.
//!
//! Templates are compiled into the binary. Every name ends in `.html`, so
//! tera autoescapes each interpolated value.

use std::sync::LazyLock;

use tera::{Context, Tera};
use tracing::error;

pub const CONFIRMATION_REQUEST: &str = "confirmation_request.html";
pub const BOOKING_CONFIRMED: &str = "booking_confirmed.html";
pub const CONFIRM_PAGE: &str = "confirm_page.html";

static TEMPLATES: LazyLock<Tera> = LazyLock::new(|| match build() {
    Ok(tera) => tera,
    Err(e) => {
        error!("built-in templates failed to compile: {e}");
        Tera::default()
    }
});

fn build() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        (
            CONFIRMATION_REQUEST,
            include_str!("../templates/confirmation_request.html"),
        ),
        (
            BOOKING_CONFIRMED,
            include_str!("../templates/booking_confirmed.html"),
        ),
        (CONFIRM_PAGE, include_str!("../templates/confirm_page.html")),
    ])?;
    Ok(tera)
}

pub fn render(name: &str, context: &Context) -> Result<String, tera::Error> {
    TEMPLATES.render(name, context)
}
