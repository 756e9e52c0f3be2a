//! # Dispatch Engine
//!
//! One dispatch, for every protocol:
//!
//! 1. Apply the protocol's route, if any.
//! 2. Resolve channels for each envelope topic (wildcards expand here).
//! 3. Admit participants: lease alive, filter passes, each id at most once.
//! 4. Per participant: breaker open → empty response; cap spent → empty
//!    response; otherwise run the callback under its execution strategy.
//! 5. Deliver each response to the protocol's sink.
//!
//! Publish sinks log failures and turn them into [`DeadLetter`]s. Request
//! sinks fill a single slot; scatter sinks append to the gather buffer.

use crate::bus::BusCore;
use crate::channel::Protocol;
use crate::error::BusError;
use crate::gather::{PendingResponse, ResponseSink, ScatterGather};
use crate::participant::{Claim, Participant};
use crate::workers::Job;
use crate::{DeadLetter, DLQ_TOPIC};
use courier_types::{Envelope, Response};
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl BusCore {
    /// Participants that should see this envelope, in registration order.
    fn admit<T, R>(&self, protocol: Protocol, envelope: &Envelope<T>) -> Vec<Arc<Participant<T, R>>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let mut seen = HashSet::new();
        let mut admitted = Vec::new();
        for topic in envelope.topics() {
            for channel in self.channels.resolve::<T, R>(protocol, topic) {
                for participant in channel.snapshot().iter() {
                    if !seen.insert(participant.id) {
                        continue;
                    }
                    if !participant.is_alive() {
                        debug!(registration = participant.id, "Lease owner dropped, removing registration");
                        self.retire(participant.id);
                        continue;
                    }
                    if participant.accepts(envelope) {
                        admitted.push(participant.clone());
                    }
                }
            }
        }
        admitted.sort_by_key(|p| p.id);
        admitted
    }

    /// Gate and run one participant. Returns `true` if its callback was
    /// queued or run.
    fn dispatch<T, R>(
        &self,
        protocol: Protocol,
        participant: &Arc<Participant<T, R>>,
        envelope: &Arc<Envelope<T>>,
        sink: ResponseSink<R>,
    ) -> bool
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        if !participant.can_proceed() {
            trace!(registration = participant.id, "Circuit open, skipping participant");
            sink(participant.empty());
            return false;
        }

        let last = match participant.claim() {
            Claim::Granted { last } => last,
            Claim::Exhausted => {
                trace!(registration = participant.id, "Invocation cap reached");
                sink(participant.empty());
                if protocol == Protocol::Publish {
                    self.retire(participant.id);
                }
                return false;
            }
        };

        let job: Job = {
            let participant = participant.clone();
            let envelope = envelope.clone();
            let sink = sink.clone();
            Box::new(move || sink(participant.invoke(&envelope)))
        };
        let dispatched = match self.workers.execute(&participant.target, job) {
            Ok(()) => {
                trace!(
                    registration = participant.id,
                    envelope_id = envelope.id(),
                    protocol = protocol.as_str(),
                    "Dispatched"
                );
                true
            }
            Err(error) => {
                warn!(
                    registration = participant.id,
                    participant = ?participant.name,
                    error = %error,
                    "Could not schedule participant"
                );
                sink(participant.failed(&error));
                false
            }
        };

        // Subscribers are removed as soon as their last invocation is claimed.
        if last && protocol == Protocol::Publish {
            self.retire(participant.id);
        }
        dispatched
    }

    pub(crate) fn publish_envelope<T>(self: &Arc<Self>, envelope: Envelope<T>) -> Result<usize, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_live()?;
        let envelope = self.route::<T, ()>(Protocol::Publish, envelope);
        let participants = self.admit::<T, ()>(Protocol::Publish, &envelope);
        if participants.is_empty() {
            trace!(topic = %envelope.topic(), "No subscribers");
            return Ok(0);
        }

        let sink = self.dead_letter_sink(&envelope);
        let envelope = Arc::new(envelope);
        let dispatched = participants
            .iter()
            .filter(|p| self.dispatch(Protocol::Publish, p, &envelope, sink.clone()))
            .count();
        Ok(dispatched)
    }

    /// Sink that logs subscriber failures and republishes them as dead letters.
    fn dead_letter_sink<T: 'static>(self: &Arc<Self>, envelope: &Envelope<T>) -> ResponseSink<()> {
        let bus = Arc::downgrade(self);
        let topic = envelope.topic().to_string();
        let envelope_id = envelope.id();
        // A failing dead-letter subscriber must not feed itself.
        let forward = self.config.dead_letters && TypeId::of::<T>() != TypeId::of::<DeadLetter>();

        Arc::new(move |response: Response<()>| {
            let Some(error) = response.error_information() else {
                return;
            };
            warn!(
                topic = %topic,
                envelope_id,
                participant = ?response.name(),
                error = %error,
                "Subscriber failed"
            );
            if !forward {
                return;
            }
            let Some(bus) = bus.upgrade() else {
                return;
            };
            let letter = DeadLetter {
                participant: response.name().map(String::from),
                topic: topic.clone(),
                envelope_id,
                error: error.clone(),
            };
            let envelope = bus.factory.create_for_topic(DLQ_TOPIC, letter);
            if let Err(e) = bus.publish_envelope(envelope) {
                debug!(error = %e, "Dead letter dropped");
            }
        })
    }

    pub(crate) fn request_envelope<T, R>(&self, envelope: Envelope<T>) -> Result<PendingResponse<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.ensure_live()?;
        let envelope = self.route::<T, R>(Protocol::Request, envelope);
        let topic = envelope.topic().to_string();

        // First registered wins.
        let Some(responder) = self.admit::<T, R>(Protocol::Request, &envelope).into_iter().next() else {
            return Err(BusError::NoResponder { topic });
        };

        let (pending, sink) = PendingResponse::new(topic, self.config.request_timeout);
        self.dispatch(Protocol::Request, &responder, &Arc::new(envelope), sink);
        Ok(pending)
    }

    pub(crate) fn scatter_envelope<T, R>(&self, envelope: Envelope<T>) -> Result<ScatterGather<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.ensure_live()?;
        let envelope = self.route::<T, R>(Protocol::Scatter, envelope);
        let participants = self.admit::<T, R>(Protocol::Scatter, &envelope);

        let (gather, sink) = ScatterGather::new(
            envelope.topic().to_string(),
            participants.len(),
            self.config.gather_timeout,
        );
        let envelope = Arc::new(envelope);
        for participant in &participants {
            self.dispatch(Protocol::Scatter, participant, &envelope, sink.clone());
        }
        Ok(gather)
    }
}
