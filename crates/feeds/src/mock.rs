//! Scripted transport for session tests.

use crate::{Connection, Connector, FeedError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One step a scripted server performs while the session is reading.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Frame(String),
    Wait(Duration),
    Close,
}

/// Behaviour of one connection attempt.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// The connection attempt fails.
    Refuse,
    /// The connection opens and plays `steps`; afterwards it stays idle.
    Open {
        steps: Vec<Step>,
        /// Frames played back after each unsubscribe request, one list per
        /// request, in order.
        acks: Vec<Vec<String>>,
    },
}

impl Script {
    pub(crate) fn open(steps: Vec<Step>) -> Self {
        Script::Open { steps, acks: Vec::new() }
    }

    pub(crate) fn with_acks(steps: Vec<Step>, acks: Vec<&str>) -> Self {
        Self::with_replies(steps, acks.into_iter().map(|ack| vec![ack]).collect())
    }

    pub(crate) fn with_replies(steps: Vec<Step>, replies: Vec<Vec<&str>>) -> Self {
        Script::Open {
            steps,
            acks: replies
                .into_iter()
                .map(|frames| frames.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }
}

/// What the session did against the scripted server.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    pub attempts: Vec<Instant>,
    /// Frames sent, one list per opened connection.
    pub sent: Vec<Vec<String>>,
    pub closed: usize,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            journal: Arc::default(),
        }
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.journal.lock().unwrap().attempts.clone()
    }

    pub(crate) fn sent(&self) -> Vec<Vec<String>> {
        self.journal.lock().unwrap().sent.clone()
    }

    pub(crate) fn closed(&self) -> usize {
        self.journal.lock().unwrap().closed
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn Connection>, FeedError> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
        let index = {
            let mut journal = self.journal.lock().unwrap();
            journal.attempts.push(Instant::now());
            match script {
                Script::Refuse => None,
                Script::Open { .. } => {
                    journal.sent.push(Vec::new());
                    Some(journal.sent.len() - 1)
                }
            }
        };

        match (script, index) {
            (Script::Open { steps, acks }, Some(index)) => Ok(Box::new(ScriptedConnection {
                index,
                steps: steps.into(),
                acks: acks.into(),
                replies: VecDeque::new(),
                journal: self.journal.clone(),
            })),
            _ => Err(FeedError::ConnectionOpenFailed("connection refused".to_string())),
        }
    }
}

struct ScriptedConnection {
    index: usize,
    steps: VecDeque<Step>,
    acks: VecDeque<Vec<String>>,
    replies: VecDeque<String>,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, frame: &str) -> Result<(), FeedError> {
        self.journal.lock().unwrap().sent[self.index].push(frame.to_string());
        if frame.contains("\"unsubscribe\"") {
            if let Some(frames) = self.acks.pop_front() {
                self.replies.extend(frames);
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, FeedError> {
        if let Some(reply) = self.replies.pop_front() {
            return Ok(reply);
        }
        loop {
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => return Ok(frame),
                Some(Step::Wait(duration)) => tokio::time::sleep(duration).await,
                Some(Step::Close) => {
                    return Err(FeedError::ConnectionClosed("closed by server".to_string()))
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        self.journal.lock().unwrap().closed += 1;
    }
}
