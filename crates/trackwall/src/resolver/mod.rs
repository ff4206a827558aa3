mod upstream;

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Context as _;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::{RData, Record, RecordType};
use trackwall_policy::{unix_now, Action, RecordKind};

use crate::{Connection, State};

/// Answers DNS questions: spoof, empty out, or forward, according to the
/// shared policy state.
pub struct Resolver {
    state: Arc<State>,
}

impl Resolver {
    pub fn new(state: Arc<State>) -> Self {
        Resolver { state }
    }

    pub async fn resolve_query(self: Arc<Self>, mut connection: Connection, raw: Vec<u8>) -> anyhow::Result<()> {
        let query = match Message::from_vec(&raw) {
            Ok(query) => query,
            Err(e) => {
                tracing::debug!("dropping an unparseable query: {e}");
                return Ok(());
            }
        };

        // No question section? Just bail out.
        let Some(question) = query.queries().first() else {
            let reply = error_reply(&query, ResponseCode::FormErr)
                .to_vec()
                .context("error while encoding a FORMERR reply")?;
            return connection.send_reply(&reply).await;
        };

        // Only A and AAAA questions are ever spoofed; everything else goes
        // straight to the upstream without touching the cache.
        let Some(qtype) = record_kind(question.query_type()) else {
            return self.forward(&mut connection, &raw, &query).await;
        };

        let name = question.name().to_ascii();
        let name = name.trim_end_matches('.').to_ascii_lowercase();

        let (action, from_cache) = self.decide(qtype, &name, unix_now()).await;
        if !from_cache {
            tracing::info!(action = %action, name = %name);
        }

        match action {
            Action::Forward => self.forward(&mut connection, &raw, &query).await,
            Action::Spoof => {
                let reply =
                    spoof_reply(&query, self.state.config.spoof_ip()?).context("error while encoding a spoofed reply")?;
                connection.send_reply(&reply).await
            }
            Action::Empty => {
                let reply = empty_reply(&query).context("error while encoding an empty reply")?;
                connection.send_reply(&reply).await
            }
        }
    }

    /// The decision pipeline: cache, then overrides, then the host suffix
    /// walk, then the regexps. The boolean is true for cache hits, which
    /// suppresses per-query logging.
    pub async fn decide(&self, qtype: RecordKind, name: &str, now: i64) -> (Action, bool) {
        if let Some(action) = self.state.cache.read().await.get(qtype, name, now) {
            return (action, true);
        }

        let overridden = self.state.overrides.write().await.check(name, now);
        let action = if overridden {
            Action::Forward
        } else {
            let mut blocked = self.state.hosts.read().await.matches_suffix(name);
            if !blocked {
                blocked = self.state.regexps.read().await.is_match(name);
            }
            match (blocked, qtype) {
                (true, RecordKind::Aaaa) => Action::Empty,
                (true, RecordKind::A) => Action::Spoof,
                (false, _) => Action::Forward,
            }
        };

        let expires_at = now + self.state.config.cache_dns;
        self.state.cache.write().await.put(qtype, name, action, expires_at);
        (action, false)
    }

    async fn forward(&self, connection: &mut Connection, raw: &[u8], query: &Message) -> anyhow::Result<()> {
        let upstream = self.state.config.dns_forward;
        match upstream::exchange(raw, upstream, connection.is_tcp()).await {
            Ok(reply) => connection.send_reply(&reply).await,
            Err(e) => {
                let qname = query
                    .queries()
                    .first()
                    .map(|q| q.name().to_ascii())
                    .unwrap_or_default();
                tracing::warn!("unable to forward a query for {qname:?} to {upstream}: {e:#}");
                let reply = error_reply(query, ResponseCode::ServFail)
                    .to_vec()
                    .context("error while encoding a SERVFAIL reply")?;
                connection.send_reply(&reply).await
            }
        }
    }
}

fn record_kind(rtype: RecordType) -> Option<RecordKind> {
    match rtype {
        RecordType::A => Some(RecordKind::A),
        RecordType::AAAA => Some(RecordKind::Aaaa),
        _ => None,
    }
}

/// A spoofed answer: the original question echoed plus a single A record
/// pointing at our HTTP frontend. The TTL is forced to 0 so clients do not
/// pin the blocked state.
fn spoof_reply(query: &Message, spoof_ip: Ipv4Addr) -> anyhow::Result<Vec<u8>> {
    let mut reply = reply_skeleton(query);
    if let Some(question) = query.queries().first() {
        reply.add_answer(Record::from_rdata(question.name().clone(), 0, RData::A(spoof_ip.into())));
    }
    Ok(reply.to_vec()?)
}

/// The same reply with an empty answer section, used for blocked AAAA
/// questions.
fn empty_reply(query: &Message) -> anyhow::Result<Vec<u8>> {
    Ok(reply_skeleton(query).to_vec()?)
}

fn reply_skeleton(query: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_id(query.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(query.op_code());
    reply.set_recursion_desired(true);
    reply.set_recursion_available(true);
    reply.set_response_code(ResponseCode::NoError);
    reply.add_queries(query.queries().to_vec());
    reply
}

fn error_reply(query: &Message, code: ResponseCode) -> Message {
    let mut reply = Message::new();
    reply.set_id(query.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(query.op_code());
    reply.set_recursion_desired(query.recursion_desired());
    reply.set_recursion_available(true);
    reply.set_response_code(code);
    reply.add_queries(query.queries().to_vec());
    reply
}
