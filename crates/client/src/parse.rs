//! Listing page parser port.

use roomwatch_core::Listing;

/// Turns a raw listing page into structured listings.
///
/// Parsing never fails: markup that cannot be interpreted yields an empty list.
pub trait Parser: Send + Sync {
    fn parse_listings(&self, html: &str) -> Vec<Listing>;
}

impl<F> Parser for F
where
    F: Fn(&str) -> Vec<Listing> + Send + Sync,
{
    fn parse_listings(&self, html: &str) -> Vec<Listing> {
        self(html)
    }
}
