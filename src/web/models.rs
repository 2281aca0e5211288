use serde::{Deserialize, Serialize};

use crate::auth::{AuthUser, SocialProvider};
use crate::widget::{ChatMessage, WidgetSnapshot};

pub const MAX_QUERY_CHARS: usize = 2000;

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub selected_text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: ChatMessage,
    pub state: WidgetSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ChatState {
    pub signed_in: bool,
    #[serde(flatten)]
    pub widget: Option<WidgetSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SocialSignInRequest {
    pub provider: SocialProvider,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: Option<AuthUser>,
    pub display_name: Option<String>,
}

impl From<Option<AuthUser>> for UserResponse {
    fn from(user: Option<AuthUser>) -> Self {
        let display_name = user.as_ref().map(|user| user.display_name().to_string());
        Self { user, display_name }
    }
}
