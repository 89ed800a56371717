#[cfg(test)]
mod tests {
    use crate::handlers::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use wardlock_core::types::{LeaseType, Priority, ResourceType};
    use wardlock_core::{CoreError, StoreError};

    fn status_of(err: CoreError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn core_errors_map_to_http_status() {
        assert_eq!(status_of(CoreError::not_found("lease", "l1")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(CoreError::Expired {
                lease_id: "l1".to_string(),
                expired_at: 0
            }),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(CoreError::Forbidden {
                actor_id: "dr_a".to_string(),
                operation: "force-release a lease"
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(CoreError::InvalidRequest("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(CoreError::Storage(StoreError::Backend("disk".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn conflicts_are_409() {
        let response = ApiError::conflict("held", serde_json::json!({"holder_id": "dr_a"})).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn enum_fields_parse_or_list_valid_values() {
        assert_eq!(parse_resource_type("medical_record").unwrap(), ResourceType::MedicalRecord);
        assert_eq!(parse_lease_type("medical_record_edit").unwrap(), LeaseType::MedicalRecordEdit);
        assert!(parse_resource_type("spaceship").is_err());
        assert_eq!(parse_priority(None).unwrap(), Priority::Normal);
        assert_eq!(parse_priority(Some("urgent")).unwrap(), Priority::Urgent);
        assert!(parse_priority(Some("whenever")).is_err());
    }

    #[test]
    fn acquire_request_leaves_ttl_to_the_lock_manager_and_rejects_blank_resource() {
        let mut req: AcquireLeaseRequest = serde_json::from_value(serde_json::json!({
            "resource_type": "medical_record",
            "resource_id": "mr1",
            "lease_type": "medical_record_edit",
            "ttl_minutes": 0
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        req.ttl_minutes = Some(10);
        assert!(req.validate().is_ok());

        req.resource_id = " ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn status_query_needs_known_type_and_resource_id() {
        let query = LeaseStatusQuery {
            resource_type: "medical_record".to_string(),
            resource_id: "mr1".to_string(),
        };
        assert_eq!(query.validate().unwrap(), ResourceType::MedicalRecord);

        let blank = LeaseStatusQuery {
            resource_type: "medical_record".to_string(),
            resource_id: "".to_string(),
        };
        assert!(blank.validate().is_err());

        let unknown = LeaseStatusQuery {
            resource_type: "chart".to_string(),
            resource_id: "mr1".to_string(),
        };
        assert!(unknown.validate().is_err());
    }
}
