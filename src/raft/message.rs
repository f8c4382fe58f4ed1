use super::{Entry, Index, Term};

use serde::{Deserialize, Serialize};

/// The reserved broadcast address. The simulator fans a datagram addressed
/// to it out to every replica. It doubles as the leader hint while no
/// leader is known.
pub const BROADCAST: &str = "FFFF";

/// The wire sentinel for "no previous log entry", used as both pLI and pLT
/// in heartbeats. A pLI of 0 with entries means "replicate from the start".
pub const NO_PREV_ENTRY: i64 = -1;

/// A message envelope. Every datagram carries exactly one JSON-encoded
/// envelope: the routing fields below plus a message body tagged by its
/// "type" field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sender.
    pub src: String,
    /// The recipient, possibly BROADCAST.
    pub dst: String,
    /// The sender's current leader hint, or BROADCAST when unknown.
    pub leader: String,
    /// The message body.
    #[serde(flatten)]
    pub message: Message,
}

/// A message body, self-describing via its "type" tag. Raft RPCs carry the
/// sender's term; client traffic does not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Announces a replica to the cluster at startup.
    #[serde(rename = "hello")]
    Hello,

    /// A client read of a single key.
    #[serde(rename = "get")]
    Get {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
    },

    /// A client write of a single key.
    #[serde(rename = "put")]
    Put {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
        value: String,
    },

    /// Acknowledges a client request. Carries the read value for a get;
    /// a put ok has no value.
    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    /// Rejects a client request, e.g. a write lost to a leader change.
    /// The client must retry.
    #[serde(rename = "fail")]
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// Tells a client to resend its request to the envelope's leader hint.
    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// AppendEntries: the leader replicates log entries to a peer, or
    /// asserts leadership with an empty heartbeat (pLI = pLT = -1).
    #[serde(rename = "aerpc")]
    Append {
        term: Term,
        /// The index of the entry preceding `entries`, or a sentinel.
        #[serde(rename = "pLI")]
        prev_index: i64,
        /// The term of the entry preceding `entries`, or a sentinel.
        #[serde(rename = "pLT")]
        prev_term: i64,
        entries: Vec<Entry>,
        /// The leader's commit index.
        #[serde(rename = "lC")]
        leader_commit: Index,
    },

    /// AppendEntries response. On success, LI is the responder's log
    /// length after appending.
    #[serde(rename = "aerpcR")]
    AppendResponse {
        term: Term,
        #[serde(rename = "r")]
        success: bool,
        #[serde(rename = "LI", default, skip_serializing_if = "Option::is_none")]
        last_index: Option<Index>,
    },

    /// RequestVote: a candidate solicits votes, advertising its last log
    /// index and term.
    #[serde(rename = "rvrpc")]
    Campaign {
        term: Term,
        #[serde(rename = "pLI")]
        last_index: Index,
        #[serde(rename = "pLT")]
        last_term: Term,
    },

    /// RequestVote response.
    #[serde(rename = "rvrpcR")]
    CampaignResponse {
        term: Term,
        #[serde(rename = "r")]
        granted: bool,
    },
}

impl Message {
    /// Returns the protocol term carried by the message, if any. Client
    /// messages carry no term.
    pub fn term(&self) -> Option<Term> {
        match self {
            Message::Append { term, .. }
            | Message::AppendResponse { term, .. }
            | Message::Campaign { term, .. }
            | Message::CampaignResponse { term, .. } => Some(*term),
            Message::Hello
            | Message::Get { .. }
            | Message::Put { .. }
            | Message::Ok { .. }
            | Message::Fail { .. }
            | Message::Redirect { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn envelope(message: Message) -> Envelope {
        Envelope { src: "0001".into(), dst: "0002".into(), leader: "0003".into(), message }
    }

    #[test]
    fn encode_client_messages() {
        assert_eq!(
            serde_json::to_value(envelope(Message::Put {
                mid: "M1".into(),
                key: "x".into(),
                value: "1".into(),
            }))
            .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "put", "MID": "M1", "key": "x", "value": "1",
            }),
        );

        // A put ok omits the value field entirely.
        assert_eq!(
            serde_json::to_value(envelope(Message::Ok { mid: "M1".into(), value: None })).unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "ok", "MID": "M1",
            }),
        );

        // A get ok carries the value, even when empty.
        assert_eq!(
            serde_json::to_value(envelope(Message::Ok { mid: "M2".into(), value: Some("".into()) }))
                .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "ok", "MID": "M2", "value": "",
            }),
        );

        assert_eq!(
            serde_json::to_value(envelope(Message::Redirect { mid: "M3".into() })).unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "redirect", "MID": "M3",
            }),
        );
    }

    #[test]
    fn encode_append() {
        let entry = Entry {
            key: "x".into(),
            value: "1".into(),
            term: 2,
            mid: "M1".into(),
            client: "C1".into(),
        };
        assert_eq!(
            serde_json::to_value(envelope(Message::Append {
                term: 3,
                prev_index: 4,
                prev_term: 2,
                entries: vec![entry],
                leader_commit: 4,
            }))
            .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "aerpc", "term": 3, "pLI": 4, "pLT": 2,
                "entries": [["x", "1", 2, "M1", "C1"]], "lC": 4,
            }),
        );
    }

    #[test]
    fn encode_heartbeat_sentinel() {
        assert_eq!(
            serde_json::to_value(envelope(Message::Append {
                term: 3,
                prev_index: NO_PREV_ENTRY,
                prev_term: NO_PREV_ENTRY,
                entries: Vec::new(),
                leader_commit: 0,
            }))
            .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "aerpc", "term": 3, "pLI": -1, "pLT": -1,
                "entries": [], "lC": 0,
            }),
        );
    }

    #[test]
    fn encode_append_response() {
        assert_eq!(
            serde_json::to_value(envelope(Message::AppendResponse {
                term: 3,
                success: true,
                last_index: Some(7),
            }))
            .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "aerpcR", "term": 3, "r": true, "LI": 7,
            }),
        );

        // A rejection omits LI.
        assert_eq!(
            serde_json::to_value(envelope(Message::AppendResponse {
                term: 3,
                success: false,
                last_index: None,
            }))
            .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "aerpcR", "term": 3, "r": false,
            }),
        );
    }

    #[test]
    fn encode_campaign() {
        assert_eq!(
            serde_json::to_value(envelope(Message::Campaign {
                term: 4,
                last_index: 9,
                last_term: 3,
            }))
            .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "rvrpc", "term": 4, "pLI": 9, "pLT": 3,
            }),
        );

        assert_eq!(
            serde_json::to_value(envelope(Message::CampaignResponse { term: 4, granted: true }))
                .unwrap(),
            json!({
                "src": "0001", "dst": "0002", "leader": "0003",
                "type": "rvrpcR", "term": 4, "r": true,
            }),
        );
    }

    #[test]
    fn decode() {
        let raw = r#"{"src":"0002","dst":"0001","leader":"FFFF","type":"get","MID":"M9","key":"y"}"#;
        assert_eq!(
            serde_json::from_str::<Envelope>(raw).unwrap(),
            Envelope {
                src: "0002".into(),
                dst: "0001".into(),
                leader: BROADCAST.into(),
                message: Message::Get { mid: "M9".into(), key: "y".into() },
            },
        );

        let raw = r#"{"src":"0002","dst":"0001","leader":"0002","type":"aerpc","term":1,
            "pLI":-1,"pLT":-1,"entries":[["k","v",1,"M1","C1"]],"lC":0}"#;
        assert_eq!(
            serde_json::from_str::<Envelope>(raw).unwrap().message,
            Message::Append {
                term: 1,
                prev_index: -1,
                prev_term: -1,
                entries: vec![Entry {
                    key: "k".into(),
                    value: "v".into(),
                    term: 1,
                    mid: "M1".into(),
                    client: "C1".into(),
                }],
                leader_commit: 0,
            },
        );

        // An aerpcR rejection has no LI field.
        let raw = r#"{"src":"0002","dst":"0001","leader":"0002","type":"aerpcR","term":3,"r":false}"#;
        assert_eq!(
            serde_json::from_str::<Envelope>(raw).unwrap().message,
            Message::AppendResponse { term: 3, success: false, last_index: None },
        );
    }

    #[test]
    fn decode_malformed() {
        for raw in [
            "",
            "not json",
            r#"{"src":"0002","dst":"0001","leader":"FFFF"}"#,
            r#"{"src":"0002","dst":"0001","leader":"FFFF","type":"bogus"}"#,
            r#"{"src":"0002","dst":"0001","leader":"FFFF","type":"get"}"#,
        ] {
            assert!(serde_json::from_str::<Envelope>(raw).is_err(), "accepted {raw}");
        }
    }

    #[test]
    fn message_term() {
        assert_eq!(Message::Hello.term(), None);
        assert_eq!(Message::Get { mid: "M1".into(), key: "x".into() }.term(), None);
        assert_eq!(Message::CampaignResponse { term: 7, granted: false }.term(), Some(7));
        assert_eq!(
            Message::Append {
                term: 2,
                prev_index: -1,
                prev_term: -1,
                entries: Vec::new(),
                leader_commit: 0,
            }
            .term(),
            Some(2),
        );
    }
}
