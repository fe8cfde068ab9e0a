use std::sync::Arc;

use actix_web::http::header::USER_AGENT;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::models::review::{PublicReview, Review, ReviewStatus, ReviewSubmission};
use crate::store::ReviewStore;
use crate::workflow::WorkflowManager;

/// Shared handler state, constructed once in `main`.
pub struct AppState {
    pub store: Arc<ReviewStore>,
    pub workflow: Arc<WorkflowManager>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Date,
    Rating,
    Name,
}

impl SortField {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "date" => Some(SortField::Date),
            "rating" => Some(SortField::Rating),
            "name" => Some(SortField::Name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub featured: Option<bool>,
    pub min_rating: Option<u8>,
    pub relationship: Option<String>,
    pub search: Option<String>,
}

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayParams {
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl DisplayParams {
    pub fn from_query(query: DisplayQuery) -> Result<Self, ApiError> {
        let sort_by = match query.sort_by.as_deref() {
            None => SortField::Date,
            Some(raw) => SortField::parse(raw).ok_or(ApiError::InvalidSortField)?,
        };
        let sort_order = match query.sort_order.as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };
        Ok(Self {
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: query.offset.unwrap_or(0),
            sort_by,
            sort_order,
            featured: query.featured,
            min_rating: query.min_rating,
            relationship: query.relationship,
            search: query.search,
        })
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub has_more: bool,
    pub limit: usize,
    pub offset: usize,
}

pub fn filter_reviews(reviews: Vec<Review>, params: &DisplayParams) -> Vec<Review> {
    let search = params.search.as_ref().map(|s| s.to_lowercase());
    reviews
        .into_iter()
        .filter(|review| {
            if let Some(min) = params.min_rating {
                if review.rating < min {
                    return false;
                }
            }
            if let Some(featured) = params.featured {
                if review.featured != featured {
                    return false;
                }
            }
            if let Some(relationship) = &params.relationship {
                if !review.relationship.eq_ignore_ascii_case(relationship) {
                    return false;
                }
            }
            if let Some(needle) = &search {
                let haystack =
                    format!("{} {}", review.name, review.testimonial).to_lowercase();
                if !haystack.contains(needle.as_str()) {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Stable sort, so reviews that compare equal keep their relative order.
pub fn sort_reviews(reviews: &mut [Review], params: &DisplayParams) {
    reviews.sort_by(|a, b| {
        let ordering = match params.sort_by {
            SortField::Date => a.submitted_at.cmp(&b.submitted_at),
            SortField::Rating => a.rating.cmp(&b.rating),
            SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        };
        match params.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

pub fn paginate(reviews: Vec<Review>, params: &DisplayParams) -> (Vec<Review>, Pagination) {
    let total = reviews.len();
    let page: Vec<Review> = reviews
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .collect();
    let pagination = Pagination {
        total,
        current_page: params.offset / params.limit + 1,
        total_pages: total.div_ceil(params.limit),
        has_more: params.offset + params.limit < total,
        limit: params.limit,
        offset: params.offset,
    };
    (page, pagination)
}

pub async fn submit_review(
    state: web::Data<AppState>,
    body: web::Json<ReviewSubmission>,
    request: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let mut submission = body.into_inner();
    submission.validate().map_err(ApiError::Validation)?;
    submission.ip_address = request.peer_addr().map(|addr| addr.ip().to_string());
    submission.user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let review = Review::from_submission(submission);
    info!("received review submission {}", review.id);
    let workflow = state.workflow.initiate_verification(review).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "reviewId": workflow.review_id,
            "status": workflow.status,
        },
    })))
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub token: String,
    pub email: String,
}

pub async fn verify_review(
    state: web::Data<AppState>,
    query: web::Query<VerifyQuery>,
) -> Result<HttpResponse, ApiError> {
    let workflow = state
        .workflow
        .process_verification(&query.token, &query.email)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "reviewId": workflow.review_id,
            "status": workflow.status,
        },
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerateRequest {
    pub review_id: String,
    pub approved: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn moderate_review(
    state: web::Data<AppState>,
    body: web::Json<ModerateRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let workflow = state
        .workflow
        .process_approval(&request.review_id, request.approved, request.notes)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "reviewId": workflow.review_id,
            "status": workflow.status,
        },
    })))
}

pub async fn display_reviews(
    state: web::Data<AppState>,
    query: web::Query<DisplayQuery>,
) -> Result<HttpResponse, ApiError> {
    let params = DisplayParams::from_query(query.into_inner())?;

    let approved = state.store.list(ReviewStatus::Approved).await?;
    let mut filtered = filter_reviews(approved, &params);
    sort_reviews(&mut filtered, &params);
    let (page, pagination) = paginate(filtered, &params);
    let reviews: Vec<PublicReview> = page.iter().map(PublicReview::from).collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "reviews": reviews,
            "pagination": pagination,
            "filters": params,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn review(id: &str, name: &str, rating: u8, age_minutes: i64) -> Review {
        Review {
            id: id.into(),
            name: name.into(),
            email: format!("{id}@example.com"),
            testimonial: format!("Testimonial from {name}"),
            rating,
            relationship: "colleague".into(),
            status: ReviewStatus::Approved,
            featured: false,
            ip_address: None,
            user_agent: None,
            submitted_at: Utc::now() - Duration::minutes(age_minutes),
            verified_at: None,
            moderated_at: None,
        }
    }

    fn params(query: DisplayQuery) -> DisplayParams {
        DisplayParams::from_query(query).unwrap()
    }

    fn empty_query() -> DisplayQuery {
        DisplayQuery {
            limit: None,
            offset: None,
            sort_by: None,
            sort_order: None,
            featured: None,
            min_rating: None,
            relationship: None,
            search: None,
        }
    }

    #[test]
    fn min_rating_keeps_only_high_ratings_in_order() {
        let reviews = vec![
            review("r1", "Alice", 5, 30),
            review("r2", "Bob", 4, 20),
            review("r3", "Cara", 3, 10),
        ];
        let params = params(DisplayQuery {
            min_rating: Some(4),
            ..empty_query()
        });
        let filtered = filter_reviews(reviews, &params);
        let ids: Vec<&str> = filtered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn pagination_first_and_second_page() {
        let reviews: Vec<Review> = (0..15)
            .map(|i| review(&format!("r{i}"), "Alice", 5, i))
            .collect();

        let first = params(DisplayQuery {
            limit: Some(10),
            offset: Some(0),
            ..empty_query()
        });
        let (page, pagination) = paginate(reviews.clone(), &first);
        assert_eq!(page.len(), 10);
        assert_eq!(
            pagination,
            Pagination {
                total: 15,
                current_page: 1,
                total_pages: 2,
                has_more: true,
                limit: 10,
                offset: 0,
            }
        );

        let second = params(DisplayQuery {
            limit: Some(10),
            offset: Some(10),
            ..empty_query()
        });
        let (page, pagination) = paginate(reviews, &second);
        assert_eq!(page.len(), 5);
        assert!(!pagination.has_more);
        assert_eq!(pagination.current_page, 2);
    }

    #[test]
    fn invalid_sort_field_is_rejected() {
        let err = DisplayParams::from_query(DisplayQuery {
            sort_by: Some("email".into()),
            ..empty_query()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidSortField));
    }

    #[test]
    fn sorts_by_rating_descending_by_default_order() {
        let mut reviews = vec![
            review("r1", "Alice", 3, 30),
            review("r2", "Bob", 5, 20),
            review("r3", "Cara", 4, 10),
        ];
        let params = params(DisplayQuery {
            sort_by: Some("rating".into()),
            ..empty_query()
        });
        sort_reviews(&mut reviews, &params);
        let ratings: Vec<u8> = reviews.iter().map(|r| r.rating).collect();
        assert_eq!(ratings, vec![5, 4, 3]);
    }

    #[test]
    fn sorts_by_date_ascending_when_asked() {
        let mut reviews = vec![
            review("r1", "Alice", 5, 10),
            review("r2", "Bob", 5, 30),
            review("r3", "Cara", 5, 20),
        ];
        let params = params(DisplayQuery {
            sort_by: Some("date".into()),
            sort_order: Some("asc".into()),
            ..empty_query()
        });
        sort_reviews(&mut reviews, &params);
        let ids: Vec<&str> = reviews.iter().map(|r| r.id.as_str()).collect();
        // oldest first
        assert_eq!(ids, vec!["r2", "r3", "r1"]);
    }

    #[test]
    fn search_matches_name_and_testimonial() {
        let reviews = vec![
            review("r1", "Alice", 5, 30),
            review("r2", "Bob", 4, 20),
        ];
        let params = params(DisplayQuery {
            search: Some("alice".into()),
            ..empty_query()
        });
        let filtered = filter_reviews(reviews, &params);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "r1");
    }

    #[test]
    fn featured_filter_is_exact() {
        let mut featured = review("r1", "Alice", 5, 30);
        featured.featured = true;
        let reviews = vec![featured, review("r2", "Bob", 4, 20)];
        let params = params(DisplayQuery {
            featured: Some(true),
            ..empty_query()
        });
        let filtered = filter_reviews(reviews, &params);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "r1");
    }
}
