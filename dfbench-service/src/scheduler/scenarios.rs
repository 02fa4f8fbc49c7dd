//! Request payloads of the scheduler scenarios.
//!
//! Payloads are JSON documents matching the protobuf messages of the scheduler API in their
//! canonical JSON mapping. An array payload hands one element to each request in turn.

use std::fmt;

use serde_json::{Value, json};
use uuid::Uuid;

/// Address every simulated peer claims to run on.
pub const PEER_IP: &str = "127.0.0.1";

/// gRPC method that registers a peer for a task.
pub const REGISTER_METHOD: &str = "scheduler.Scheduler.RegisterPeerTask";
/// gRPC method that streams piece results of a peer.
pub const REPORT_PIECE_METHOD: &str = "scheduler.Scheduler.ReportPieceResult";
/// gRPC method that reports the final result of a peer.
pub const REPORT_PEER_METHOD: &str = "scheduler.Scheduler.ReportPeerResult";
/// gRPC method that looks up a task.
pub const STAT_TASK_METHOD: &str = "scheduler.Scheduler.StatTask";
/// gRPC method that announces a locally cached task.
pub const ANNOUNCE_TASK_METHOD: &str = "scheduler.Scheduler.AnnounceTask";
/// gRPC method that removes a peer from a task.
pub const LEAVE_TASK_METHOD: &str = "scheduler.Scheduler.LeaveTask";

/// A load test of one scheduler method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scenario {
    /// Registers every peer for one task.
    Register,
    /// Registers the peers, then streams one piece result per peer.
    ReportPiece,
    /// Registers the peers, then reports their results.
    ReportPeer,
    /// Registers the peers, then looks up their task.
    StatTask,
    /// Announces the task from every peer.
    AnnounceTask,
    /// Registers the peers, reports their results, then removes them from the task.
    LeaveTask,
}

impl Scenario {
    /// All scenarios in the order they are run.
    pub const ALL: [Scenario; 6] = [
        Scenario::Register,
        Scenario::ReportPiece,
        Scenario::ReportPeer,
        Scenario::StatTask,
        Scenario::AnnounceTask,
        Scenario::LeaveTask,
    ];

    /// Returns the display name of the scenario.
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Register => "Register",
            Scenario::ReportPiece => "ReportPiece",
            Scenario::ReportPeer => "ReportPeer",
            Scenario::StatTask => "StatTask",
            Scenario::AnnounceTask => "AnnounceTask",
            Scenario::LeaveTask => "LeaveTask",
        }
    }

    /// Returns the gRPC method whose latency the scenario measures.
    pub fn method(self) -> &'static str {
        match self {
            Scenario::Register => REGISTER_METHOD,
            Scenario::ReportPiece => REPORT_PIECE_METHOD,
            Scenario::ReportPeer => REPORT_PEER_METHOD,
            Scenario::StatTask => STAT_TASK_METHOD,
            Scenario::AnnounceTask => ANNOUNCE_TASK_METHOD,
            Scenario::LeaveTask => LEAVE_TASK_METHOD,
        }
    }

    /// Returns the URL of the task the scenario's peers download.
    ///
    /// Each scenario uses its own task, so scenarios do not see each other's peers.
    pub fn url(self) -> &'static str {
        match self {
            Scenario::Register => "https://register",
            Scenario::ReportPiece => "https://report-piece",
            Scenario::ReportPeer => "https://report-peer",
            Scenario::StatTask => "https://stat-task",
            Scenario::AnnounceTask => "https://announce-task",
            Scenario::LeaveTask => "https://leave-task",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns a fresh peer id in the format the scheduler expects.
pub fn peer_id(ip: &str) -> String {
    format!("{ip}-{}-{}", std::process::id(), Uuid::new_v4())
}

/// Returns the id the scheduler derives for the task at `url`.
pub fn task_id(url: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, url.as_bytes());
    hex::encode(digest)
}

fn peer_host() -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "ip": PEER_IP,
        "rpcPort": 8080,
        "downPort": 8081,
        "hostName": "localhost",
    })
}

/// One `PeerTaskRequest` per peer.
pub fn register(url: &str, peers: &[String]) -> Value {
    peers
        .iter()
        .map(|peer| {
            json!({
                "taskId": task_id(url),
                "url": url,
                "urlMeta": {},
                "peerId": peer,
                "peerHost": peer_host(),
            })
        })
        .collect()
}

/// A `PieceResult` reporting the first piece of `peer` as downloaded.
pub fn report_piece(url: &str, peer: &str) -> Value {
    json!({
        "taskId": task_id(url),
        "srcPid": peer,
        "dstPid": peer_id(PEER_IP),
        "pieceInfo": { "pieceNum": -1 },
        "success": true,
    })
}

/// One successful `PeerResult` per peer.
pub fn report_peer(url: &str, peers: &[String]) -> Value {
    peers
        .iter()
        .map(|peer| {
            json!({
                "taskId": task_id(url),
                "peerId": peer,
                "srcIp": PEER_IP,
                "url": url,
                "contentLength": 100,
                "traffic": 100,
                "cost": 10,
                "totalPieceCount": 10,
                "success": true,
            })
        })
        .collect()
}

/// `count` identical `StatTaskRequest`s.
pub fn stat_task(url: &str, count: u32) -> Value {
    let request = json!({ "taskId": task_id(url) });
    Value::Array(vec![request; count as usize])
}

/// One `AnnounceTaskRequest` per peer, each holding two pieces.
pub fn announce_task(url: &str, peers: &[String]) -> Value {
    let task_id = task_id(url);
    peers
        .iter()
        .map(|peer| {
            json!({
                "taskId": task_id,
                "cid": url,
                "urlMeta": {},
                "peerHost": peer_host(),
                "piecePacket": {
                    "taskId": task_id,
                    "dstPid": peer,
                    "dstAddr": PEER_IP,
                    "pieceInfos": [{ "pieceNum": 1 }, { "pieceNum": 2 }],
                    "totalPiece": 2,
                    "contentLength": 1000,
                },
            })
        })
        .collect()
}

/// One `PeerTarget` per peer.
pub fn leave_task(url: &str, peers: &[String]) -> Value {
    peers
        .iter()
        .map(|peer| json!({ "taskId": task_id(url), "peerId": peer }))
        .collect()
}
