//! OpenAPI document for the session endpoints, served through Swagger UI.

use utoipa::openapi::Tag;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::MessageResponse;
use crate::models::{AdminProfile, Building, Flat, FlatProfile};
use crate::rest::{self, AdminSignInRequest, AdminSignUpRequest, FlatSignInRequest, FlatSignInResponse};

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    paths(
        rest::admin_sign_up,
        rest::admin_sign_in,
        rest::admin_sign_out,
        rest::admin_auth_verify,
        rest::flat_sign_in,
        rest::flat_sign_out,
        rest::flat_auth_verify,
    ),
    components(schemas(
        AdminSignUpRequest,
        AdminSignInRequest,
        FlatSignInRequest,
        FlatSignInResponse,
        AdminProfile,
        Building,
        Flat,
        FlatProfile,
        MessageResponse,
    ))
)]
pub struct ApiDoc;

/// The generated document with package metadata and the `auth` tag described.
pub fn document() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();

    let mut auth = Tag::new("auth");
    auth.description = Some("Admin and flat sessions".to_string());
    doc.tags = Some(vec![auth]);
    doc
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url(OPENAPI_JSON_PATH, document())
}
