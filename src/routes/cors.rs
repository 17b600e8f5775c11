use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::header::{HeaderName, HeaderValue},
    http::Method,
    middleware::Next,
    web, Error, HttpResponse,
};

use crate::config::AppConfig;

const BASE_ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept, Authorization";

pub async fn cors_handler<B>(req: ServiceRequest, next: Next<B>) -> Result<ServiceResponse<EitherBody<B>>, Error>
where
    B: MessageBody,
{
    let (allow_origin, token_header) = match req.app_data::<web::Data<AppConfig>>() {
        Some(config) => (config.cors_allow_origin.clone(), config.token_header.clone()),
        None => ("*".to_string(), "token".to_string()),
    };

    let mut res = if req.method() == Method::OPTIONS {
        let res = HttpResponse::Ok().finish().map_into_right_body();
        req.into_response(res)
    } else {
        next.call(req).await?.map_into_left_body()
    };

    let headers = res.headers_mut();
    if let Ok(origin) = HeaderValue::from_str(&allow_origin) {
        headers.insert(HeaderName::from_static("access-control-allow-origin"), origin);
    }
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("POST, PUT, GET, OPTIONS, DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("86400"),
    );
    if let Ok(allow) = HeaderValue::from_str(&allow_headers(&token_header)) {
        headers.insert(HeaderName::from_static("access-control-allow-headers"), allow);
    }
    if !headers.contains_key("cache-control") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
    }

    Ok(res)
}

fn allow_headers(token_header: &str) -> String {
    if token_header.eq_ignore_ascii_case("authorization") {
        BASE_ALLOW_HEADERS.to_string()
    } else {
        format!("{}, {}", BASE_ALLOW_HEADERS, token_header)
    }
}
