use crate::api::{account, health, oauth::handlers, oauth::models};
use crate::errors::ErrorResponse;
use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth 2.0";
pub(crate) const ACCOUNT_TAG: &str = "Account API";

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::ready_check,
        handlers::authorize,
        handlers::token,
        handlers::introspect,
        handlers::revoke,
        account::login,
        account::logout,
        account::userinfo,
    ),
    components(schemas(
        ErrorResponse,
        models::TokenRequest,
        models::TokenResponse,
        models::IntrospectionRequest,
        models::IntrospectionResponse,
        models::RevocationRequest,
        account::LoginRequest,
        account::UserInfo,
    )),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Authorization code and refresh token grants"),
        (name = ACCOUNT_TAG, description = "Browser sessions and the user info resource"),
    ),
    info(
        title = "Tenant OAuth 2.0 Authorization Server",
        description = "Lets tenant instances act as OAuth clients of the platform",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;
