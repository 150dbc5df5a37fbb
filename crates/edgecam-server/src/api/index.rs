use axum::response::Html;

/// `GET /`: the viewer page with its signaling client
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}
