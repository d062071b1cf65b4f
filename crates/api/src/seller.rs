//! Seller identification from request headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::SellerId;

use crate::error::ApiError;

/// Header carrying the calling seller's id.
pub const SELLER_HEADER: &str = "x-seller-id";

/// The seller a request acts for, taken from the `x-seller-id` header.
///
/// Handlers that take this extractor reject requests without the header
/// with 401.
#[derive(Debug, Clone)]
pub struct SellerContext(pub SellerId);

impl<S> FromRequestParts<S> for SellerContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SELLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(SellerId::parse)
            .map(SellerContext)
            .ok_or(ApiError::MissingSeller)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(request: Request<()>) -> Result<SellerContext, ApiError> {
        let (mut parts, _) = request.into_parts();
        SellerContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_the_seller_header() {
        let request = Request::builder()
            .header(SELLER_HEADER, " s1 ")
            .body(())
            .unwrap();

        let SellerContext(seller) = extract(request).await.unwrap();
        assert_eq!(seller.as_str(), "s1");
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_rejected() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(ApiError::MissingSeller)));

        let blank = Request::builder()
            .header(SELLER_HEADER, "  ")
            .body(())
            .unwrap();
        assert!(matches!(extract(blank).await, Err(ApiError::MissingSeller)));
    }
}
