use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{FilterMode, IceServer};

/// Session description as exchanged with the browser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

/// Body of `POST /offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    #[serde(flatten)]
    pub description: SessionDescription,
    /// Overrides the server's default mode for this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterMode>,
}

/// Response of `POST /offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(flatten)]
    pub description: SessionDescription,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub mode: FilterMode,
    pub created_at: DateTime<Utc>,
}

/// Response of `GET /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Body of every non-2xx JSON response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_request_wire_shape() {
        let req: OfferRequest = serde_json::from_value(json!({
            "sdp": "v=0\r\n",
            "type": "offer"
        }))
        .unwrap();
        assert_eq!(req.description.sdp_type, "offer");
        assert_eq!(req.filter, None);

        let req: OfferRequest = serde_json::from_value(json!({
            "sdp": "v=0\r\n",
            "type": "offer",
            "filter": "canny"
        }))
        .unwrap();
        assert_eq!(req.filter, Some(FilterMode::Canny));
    }

    #[test]
    fn test_answer_response_is_flat() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(AnswerResponse {
            description: SessionDescription {
                sdp: "v=0\r\n".to_string(),
                sdp_type: "answer".to_string(),
            },
            session_id: id,
        })
        .unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["sdp"], "v=0\r\n");
        assert_eq!(value["session_id"], id.to_string());
    }
}
