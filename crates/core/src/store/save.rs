//! Batched, change-gated persistence of a crawl result.
//!
//! Each batch moves through `Pending -> {Committed | PerItemRetry} -> Done`.
//! A batch whose transaction fails is retried one listing per transaction so
//! a single bad row cannot discard its neighbours.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_rusqlite::rusqlite;

use super::connection::Store;
use super::listings::{insert_listing, load_snapshot, touch_listing, update_listing};
use super::pagination::identity_cache_key;
use super::sessions::{NotifyMode, SessionOptions, record_query_listing, record_session_listing};
use crate::Error;
use crate::change::compare;
use crate::identity::identity_key;
use crate::listing::{Listing, now_timestamp};

/// Best-effort outcome of one `save` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub query_id: String,
    pub session_id: i64,
    /// Listings recorded in this session.
    pub saved_count: usize,
    /// Saved listings the query had never seen before.
    pub new_count: usize,
    /// Saved listings whose content was rewritten (includes first inserts).
    pub changed_count: usize,
    /// Saved listings that only had their last-seen time touched.
    pub unchanged_count: usize,
    /// Listings rejected before any transaction (no identity, duplicates).
    pub skipped_count: usize,
    /// Listings that failed even in their own transaction.
    pub failed_count: usize,
}

/// A normalized listing with its identity, ready for a transaction.
#[derive(Debug, Clone)]
struct PreparedListing {
    identity: String,
    listing: Listing,
}

/// Per-listing result of a committed write.
#[derive(Debug, Clone, Copy)]
struct ListingOutcome {
    was_new: bool,
    changed: bool,
}

/// Values every write in one `save` call shares.
#[derive(Debug, Clone)]
struct WriteContext {
    query_id: String,
    session_id: i64,
    notify_mode: NotifyMode,
    now: String,
}

#[derive(Debug, Default)]
struct BatchReport {
    outcomes: Vec<ListingOutcome>,
    failed: usize,
}

enum BatchState {
    Pending,
    Committed(Vec<ListingOutcome>),
    PerItemRetry(Error),
    Done(BatchReport),
}

impl Store {
    /// Persist a crawl result for a search URL.
    ///
    /// Upserts the query, opens a session, writes listings in fixed-size
    /// batches and closes the session. Per-listing failures are logged and
    /// counted; only an unusable backend or an invalid search URL is an error.
    pub async fn save(
        &self, search_url: &str, listings: &[Listing], options: &SessionOptions,
    ) -> Result<SaveSummary, Error> {
        let query = self.upsert_query(search_url).await?;
        let session_id = self.create_session(&query.id, options).await?;

        let (prepared, skipped_count) = prepare(listings);
        let ctx = WriteContext {
            query_id: query.id.clone(),
            session_id,
            notify_mode: options.notify_mode,
            now: now_timestamp(),
        };

        let mut summary = SaveSummary { query_id: query.id.clone(), session_id, skipped_count, ..Default::default() };

        for (index, batch) in prepared.chunks(self.config.batch_size).enumerate() {
            let report = match self.run_batch(index, batch, &ctx).await {
                Ok(report) => report,
                Err(err) => {
                    if let Err(finish_err) = self.finish_session(session_id).await {
                        tracing::warn!(session_id, error = %finish_err, "could not finish session after fatal batch");
                    }
                    self.lookup_cache.invalidate(&identity_cache_key(&query.id)).await;
                    return Err(err);
                }
            };
            summary.failed_count += report.failed;
            for outcome in report.outcomes {
                summary.saved_count += 1;
                summary.new_count += usize::from(outcome.was_new);
                if outcome.changed {
                    summary.changed_count += 1;
                } else {
                    summary.unchanged_count += 1;
                }
            }
        }

        self.finish_session(session_id).await?;
        self.lookup_cache.invalidate(&identity_cache_key(&query.id)).await;

        tracing::info!(
            query_id = %summary.query_id,
            session_id,
            saved = summary.saved_count,
            new = summary.new_count,
            changed = summary.changed_count,
            skipped = summary.skipped_count,
            failed = summary.failed_count,
            "saved crawl result"
        );

        Ok(summary)
    }

    async fn run_batch(
        &self, index: usize, batch: &[PreparedListing], ctx: &WriteContext,
    ) -> Result<BatchReport, Error> {
        let mut state = BatchState::Pending;
        loop {
            state = match state {
                BatchState::Pending => match self.commit(batch, ctx).await {
                    Ok(outcomes) => BatchState::Committed(outcomes),
                    Err(err) => {
                        tracing::warn!(batch = index, size = batch.len(), error = %err, "batch failed, retrying per listing");
                        BatchState::PerItemRetry(err)
                    }
                },
                BatchState::Committed(outcomes) => BatchState::Done(BatchReport { outcomes, failed: 0 }),
                BatchState::PerItemRetry(cause) => {
                    let mut report = BatchReport::default();
                    for item in batch {
                        match self.commit(std::slice::from_ref(item), ctx).await {
                            Ok(mut outcomes) => report.outcomes.append(&mut outcomes),
                            Err(err) => {
                                tracing::warn!(identity = %item.identity, error = %err, "listing skipped");
                                report.failed += 1;
                            }
                        }
                    }

                    if report.outcomes.is_empty() {
                        tracing::error!(batch = index, error = %cause, "no listing in batch could be saved");
                        if cause.is_backend_unavailable() {
                            return Err(cause);
                        }
                    }
                    BatchState::Done(report)
                }
                BatchState::Done(report) => return Ok(report),
            };
        }
    }

    /// Write listings in one transaction under the wall-clock budget.
    ///
    /// The deadline is checked on the connection thread after every listing,
    /// so a transaction either commits within budget or rolls back. Outcomes
    /// are only reported for committed work.
    async fn commit(&self, items: &[PreparedListing], ctx: &WriteContext) -> Result<Vec<ListingOutcome>, Error> {
        let budget = self.config.transaction_timeout;
        let items = items.to_vec();
        let ctx = ctx.clone();

        self.conn
            .call(move |conn| -> Result<Vec<ListingOutcome>, Error> {
                let deadline = Instant::now() + budget;
                let tx = conn.transaction()?;
                let mut outcomes = Vec::with_capacity(items.len());
                for item in &items {
                    outcomes.push(write_listing(&tx, item, &ctx)?);
                    if Instant::now() > deadline {
                        return Err(Error::TransactionTimeout(format!("exceeded {}ms", budget.as_millis())));
                    }
                }
                tx.commit()?;
                Ok(outcomes)
            })
            .await
            .map_err(Error::from)
    }
}

/// Normalize, drop listings without identity and collapse duplicates.
fn prepare(listings: &[Listing]) -> (Vec<PreparedListing>, usize) {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(listings.len());
    let mut skipped = 0;

    for listing in listings {
        let listing = listing.clone().normalized();
        let Some(identity) = identity_key(&listing) else {
            tracing::warn!(title = ?listing.title, "listing has no identity, skipped");
            skipped += 1;
            continue;
        };
        if !seen.insert(identity.clone()) {
            tracing::debug!(identity = %identity, "duplicate listing in one save call, skipped");
            skipped += 1;
            continue;
        }
        prepared.push(PreparedListing { identity, listing });
    }

    (prepared, skipped)
}

/// Change-gated write of one listing plus its association rows.
fn write_listing(
    conn: &rusqlite::Connection, item: &PreparedListing, ctx: &WriteContext,
) -> Result<ListingOutcome, Error> {
    let snapshot = load_snapshot(conn, &item.identity)?;
    let change = compare(&item.listing, snapshot.as_ref().map(|s| &s.listing));

    match &snapshot {
        None => insert_listing(conn, &item.identity, &item.listing, &change.hash, &ctx.now)?,
        Some(_) if change.has_changed => {
            tracing::debug!(identity = %item.identity, fields = ?change.changed_fields, "listing changed");
            update_listing(conn, &item.identity, &item.listing, &change.hash, &ctx.now)?;
        }
        Some(_) => touch_listing(conn, &item.identity, &ctx.now)?,
    }

    let was_new = record_query_listing(conn, &ctx.query_id, &item.identity, &ctx.now)?;
    let was_notified = was_new && ctx.notify_mode != NotifyMode::Off;
    record_session_listing(conn, ctx.session_id, &item.identity, was_new, was_notified)?;

    Ok(ListingOutcome { was_new, changed: change.has_changed })
}
