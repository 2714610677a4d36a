//! `Dragonfly` (Redis-compatible) live-state operations.
//!
//! When the live state store runs in shared mode every ingestion process
//! reads and writes the same keys, so all processes see one actor map, one
//! recent-event window and one active run.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{prefix}:actor_ids` | Set | Every actor id ever seen |
//! | `{prefix}:actor:{actor_id}` | Hash | `last_seen_ms`, plus `zone:{zone_id}` -> `1`/`0` |
//! | `{prefix}:events` | List | JSON [`EventRecord`], newest at the head |
//! | `{prefix}:active_run_id` | String | Active run UUID, absent when none |
//!
//! Zone flags are separate hash fields, so two processes updating different
//! zones of the same actor never overwrite each other. Every multi-key write
//! and the snapshot read run inside one `MULTI`/`EXEC` block.

use std::collections::{BTreeMap, HashMap};

use fred::prelude::*;
use ropt_types::{ActorState, EventRecord, RunId, Transition};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DbError;

/// Hash field holding an actor's last-seen time.
const LAST_SEEN_FIELD: &str = "last_seen_ms";

/// Prefix of the per-zone flag fields in an actor hash.
const ZONE_FIELD_PREFIX: &str = "zone:";

/// Snapshot reads retried when the actor set grows underneath them.
const SNAPSHOT_ATTEMPTS: u32 = 3;

/// Fully-qualified key names for one deployment prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveKeys {
    /// Actor id set key.
    pub actor_ids: String,
    /// Recent-event list key.
    pub events: String,
    /// Active run id key.
    pub active_run_id: String,
    actor_prefix: String,
}

impl LiveKeys {
    /// Keys under `prefix` (e.g. `ropt` gives `ropt:actor_ids`).
    pub fn new(prefix: &str) -> Self {
        Self {
            actor_ids: format!("{prefix}:actor_ids"),
            events: format!("{prefix}:events"),
            active_run_id: format!("{prefix}:active_run_id"),
            actor_prefix: format!("{prefix}:actor:"),
        }
    }

    /// Hash key of one actor.
    pub fn actor(&self, actor_id: &str) -> String {
        format!("{}{actor_id}", self.actor_prefix)
    }
}

/// How an update touches one zone flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneWrite {
    /// Overwrite the flag.
    Set(bool),
    /// Create the flag as outside if missing, otherwise leave it.
    Keep,
}

impl From<Transition> for ZoneWrite {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Enter => Self::Set(true),
            Transition::Exit => Self::Set(false),
            Transition::Observe => Self::Keep,
        }
    }
}

/// Actors, recent events and the active run read in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveView {
    /// Every actor, keyed by id.
    pub actors: BTreeMap<String, ActorState>,
    /// Newest events in arrival order (oldest first).
    pub recent_events: Vec<EventRecord>,
    /// Active run, if set.
    pub active_run_id: Option<RunId>,
}

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and provides typed operations for the
/// live-state key patterns above.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    // =========================================================================
    // Events -- actor set, actor hash and event list together
    // =========================================================================

    /// Apply one event in a single transaction: register the actor, set
    /// `last_seen_ms`, update the zone flag and push the event, trimming the
    /// list to `max_events`. Returns the actor's resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the transaction fails.
    pub async fn apply_event(
        &self,
        keys: &LiveKeys,
        record: &EventRecord,
        max_events: usize,
    ) -> Result<ActorState, DbError> {
        let json = encode(record)?;
        let actor_key = keys.actor(&record.actor_id);
        let trx = self.client.multi();
        let _: () = trx.sadd(&keys.actor_ids, record.actor_id.as_str()).await?;
        let _: () = trx
            .hset(&actor_key, (LAST_SEEN_FIELD, record.ts_ms.to_string()))
            .await?;
        if let Some(zone_id) = record.zone_id.as_deref() {
            let write = ZoneWrite::from(record.transition());
            queue_zone_write(&trx, &actor_key, &zone_field(zone_id), write).await?;
        }
        let _: () = trx.lpush(&keys.events, json.as_str()).await?;
        let (start, stop) = list_range(max_events);
        let _: () = trx.ltrim(&keys.events, start, stop).await?;
        let _: () = trx.hgetall(&actor_key).await?;
        let mut replies: Vec<Value> = trx.exec(true).await?;

        let fields: HashMap<String, String> = last_reply(&mut replies)?.convert()?;
        parse_actor(&actor_key, &fields)
    }

    /// Length of the recent-event list.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn event_count(&self, keys: &LiveKeys) -> Result<usize, DbError> {
        let len: u64 = self.client.llen(&keys.events).await?;
        Ok(usize::try_from(len).unwrap_or(usize::MAX))
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Read every actor, the newest `recent` events and the active run in
    /// one transaction.
    ///
    /// The actor set is listed first; if it grew before the transaction ran
    /// the read is repeated. Entries that fail to decode are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if a read or the transaction fails.
    pub async fn snapshot(&self, keys: &LiveKeys, recent: usize) -> Result<LiveView, DbError> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);

            let ids: Vec<String> = self.client.smembers(&keys.actor_ids).await?;
            let trx = self.client.multi();
            for actor_id in &ids {
                let _: () = trx.hgetall(keys.actor(actor_id)).await?;
            }
            let (start, stop) = list_range(recent);
            let _: () = trx.lrange(&keys.events, start, stop).await?;
            let _: () = trx.get(&keys.active_run_id).await?;
            let _: () = trx.scard(&keys.actor_ids).await?;
            let mut replies: Vec<Value> = trx.exec(true).await?;

            let actor_count: u64 = last_reply(&mut replies)?.convert()?;
            let active: Option<String> = last_reply(&mut replies)?.convert()?;
            let events: Vec<String> = last_reply(&mut replies)?.convert()?;

            if usize::try_from(actor_count).ok() != Some(ids.len()) {
                if attempt < SNAPSHOT_ATTEMPTS {
                    continue;
                }
                tracing::warn!(
                    listed = ids.len(),
                    actor_count,
                    "Actor set kept changing during snapshot, returning last read"
                );
            }

            let mut actors = BTreeMap::new();
            for (actor_id, reply) in ids.into_iter().zip(replies) {
                let actor_key = keys.actor(&actor_id);
                match reply
                    .convert::<HashMap<String, String>>()
                    .map_err(DbError::from)
                    .and_then(|fields| parse_actor(&actor_key, &fields))
                {
                    Ok(actor) => {
                        actors.insert(actor_id, actor);
                    }
                    Err(e) => tracing::warn!(%actor_id, error = %e, "Skipping unreadable actor"),
                }
            }

            let recent_events = events
                .iter()
                .rev()
                .filter_map(|json| match decode::<EventRecord>(&keys.events, json) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable event");
                        None
                    }
                })
                .collect();

            let active_run_id = active.and_then(|s| match s.parse::<RunId>() {
                Ok(run_id) => Some(run_id),
                Err(e) => {
                    tracing::warn!(value = %s, error = %e, "Ignoring unreadable active run id");
                    None
                }
            });

            return Ok(LiveView {
                actors,
                recent_events,
                active_run_id,
            });
        }
    }

    // =========================================================================
    // Active run -- {prefix}:active_run_id
    // =========================================================================

    /// The active run, if one is set.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read fails or the stored id is not a UUID.
    pub async fn get_active_run(&self, keys: &LiveKeys) -> Result<Option<RunId>, DbError> {
        let value: Option<String> = self.client.get(&keys.active_run_id).await?;
        value.map(|s| parse_run_id(keys, &s)).transpose()
    }

    /// Set or clear the active run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn set_active_run(&self, keys: &LiveKeys, run_id: Option<RunId>) -> Result<(), DbError> {
        match run_id {
            Some(id) => {
                let _: () = self
                    .client
                    .set(&keys.active_run_id, id.to_string().as_str(), None, None, false)
                    .await?;
            }
            None => {
                let _: i64 = self.client.del(&keys.active_run_id).await?;
            }
        }
        Ok(())
    }

    /// Make `run_id` active unless a run already is. Returns the run that is
    /// active afterwards: `run_id` if it won, otherwise the existing one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the transaction fails or the stored id is not a
    /// UUID.
    pub async fn claim_active_run(&self, keys: &LiveKeys, run_id: RunId) -> Result<RunId, DbError> {
        let trx = self.client.multi();
        let _: () = trx
            .set(
                &keys.active_run_id,
                run_id.to_string().as_str(),
                None,
                Some(SetOptions::NX),
                false,
            )
            .await?;
        let _: () = trx.get(&keys.active_run_id).await?;
        let mut replies: Vec<Value> = trx.exec(true).await?;

        let active: Option<String> = last_reply(&mut replies)?.convert()?;
        active.map_or(Ok(run_id), |s| parse_run_id(keys, &s))
    }

    /// Delete all live-state keys under `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if a read or the delete fails.
    pub async fn clear(&self, keys: &LiveKeys) -> Result<(), DbError> {
        let ids: Vec<String> = self.client.smembers(&keys.actor_ids).await?;
        let mut doomed: Vec<String> = ids.iter().map(|id| keys.actor(id)).collect();
        doomed.extend([
            keys.actor_ids.clone(),
            keys.events.clone(),
            keys.active_run_id.clone(),
        ]);
        let _: i64 = self.client.del(doomed).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

async fn queue_zone_write(
    trx: &fred::clients::Transaction,
    actor_key: &str,
    field: &str,
    write: ZoneWrite,
) -> Result<(), DbError> {
    match write {
        ZoneWrite::Set(inside) => {
            let _: () = trx.hset(actor_key, (field, flag_value(inside))).await?;
        }
        ZoneWrite::Keep => {
            let _: () = trx.hsetnx(actor_key, field, flag_value(false)).await?;
        }
    }
    Ok(())
}

fn zone_field(zone_id: &str) -> String {
    format!("{ZONE_FIELD_PREFIX}{zone_id}")
}

const fn flag_value(inside: bool) -> &'static str {
    if inside { "1" } else { "0" }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, DbError> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(DbError::Corrupt {
            key: key.to_owned(),
            detail: format!("zone flag {other:?} is not 0 or 1"),
        }),
    }
}

/// Rebuild an [`ActorState`] from its hash fields. Unknown fields are
/// ignored.
fn parse_actor(key: &str, fields: &HashMap<String, String>) -> Result<ActorState, DbError> {
    let last_seen_ms = fields
        .get(LAST_SEEN_FIELD)
        .map(|v| {
            v.parse::<u64>().map_err(|e| DbError::Corrupt {
                key: key.to_owned(),
                detail: format!("{LAST_SEEN_FIELD}: {e}"),
            })
        })
        .transpose()?
        .unwrap_or(0);

    let mut actor = ActorState::first_seen(last_seen_ms);
    for (field, value) in fields {
        if let Some(zone_id) = field.strip_prefix(ZONE_FIELD_PREFIX) {
            actor.zones.insert(zone_id.to_owned(), parse_flag(key, value)?);
        }
    }
    Ok(actor)
}

fn parse_run_id(keys: &LiveKeys, value: &str) -> Result<RunId, DbError> {
    value.parse::<RunId>().map_err(|e| DbError::Corrupt {
        key: keys.active_run_id.clone(),
        detail: e.to_string(),
    })
}

fn last_reply(replies: &mut Vec<Value>) -> Result<Value, DbError> {
    replies.pop().ok_or_else(|| DbError::Corrupt {
        key: "EXEC".to_owned(),
        detail: "transaction returned fewer replies than commands".to_owned(),
    })
}

/// `LRANGE`/`LTRIM` bounds covering the first `len` entries. `0 -1` means
/// the whole list, so an empty window uses the inverted range `1 0`.
fn list_range(len: usize) -> (i64, i64) {
    if len == 0 {
        return (1, 0);
    }
    (0, i64::try_from(len).unwrap_or(i64::MAX).saturating_sub(1))
}

fn encode<T: Serialize>(value: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(key: &str, json: &str) -> Result<T, DbError> {
    serde_json::from_str(json).map_err(|e| DbError::Corrupt {
        key: key.to_owned(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_prefix() {
        let keys = LiveKeys::new("ropt");
        assert_eq!(keys.actor_ids, "ropt:actor_ids");
        assert_eq!(keys.actor("p1"), "ropt:actor:p1");
        assert_eq!(keys.events, "ropt:events");
        assert_eq!(keys.active_run_id, "ropt:active_run_id");
    }

    #[test]
    fn transitions_map_to_zone_writes() {
        assert_eq!(ZoneWrite::from(Transition::Enter), ZoneWrite::Set(true));
        assert_eq!(ZoneWrite::from(Transition::Exit), ZoneWrite::Set(false));
        assert_eq!(ZoneWrite::from(Transition::Observe), ZoneWrite::Keep);
    }

    #[test]
    fn actor_hash_parses_flags_and_ignores_other_fields() {
        let fields: HashMap<String, String> = [
            ("last_seen_ms", "42"),
            ("zone:zone_A", "1"),
            ("zone:zone_B", "0"),
            ("schema", "2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let actor = parse_actor("ropt:actor:p1", &fields).unwrap();
        assert_eq!(actor.last_seen_ms, 42);
        assert!(actor.is_inside("zone_A"));
        assert_eq!(actor.zones.get("zone_B"), Some(&false));
        assert_eq!(actor.zones.len(), 2);
    }

    #[test]
    fn bad_flag_is_corrupt() {
        let fields: HashMap<String, String> =
            [("zone:zone_A".to_owned(), "yes".to_owned())].into_iter().collect();
        assert!(matches!(
            parse_actor("ropt:actor:p1", &fields),
            Err(DbError::Corrupt { .. })
        ));
    }

    #[test]
    fn empty_window_is_an_empty_range() {
        assert_eq!(list_range(0), (1, 0));
        assert_eq!(list_range(5), (0, 4));
    }
}
