use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::app_state::AppState;

pub mod admin;
pub mod orders;
pub mod payments;

#[derive(OpenApi)]
#[openapi(
    modifiers(&BearerAuth),
    tags(
        (name = "Orders", description = "Buyer checkout"),
        (name = "Payments", description = "Payment verification"),
        (name = "Admin", description = "Order administration")
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// All routes with their OpenAPI specs.
pub fn routes_with_openapi(state: &AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(orders::routes_with_openapi())
        .merge(payments::routes_with_openapi())
        .merge(admin::routes_with_openapi(state.clone()))
}

/// The full application: API routes, Swagger UI at `/swagger-ui` and request tracing.
pub fn app(state: AppState) -> Router {
    let (router, mut openapi) = routes_with_openapi(&state).split_for_parts();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Storefront Orders API")
        .version("1.0.0")
        .build();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
