//! S3 HTTP API Integration Tests
//!
//! Drives the client's protocol calls against a mock S3 endpoint.
//!
//! ## Test Coverage
//!
//! - PutObject with etag and version id
//! - CreateMultipartUpload / UploadPart / CompleteMultipartUpload / Abort
//! - Errors embedded in a 200 CompleteMultipartUpload response
//! - ListMultipartUploads and ListParts pagination
//! - Service error decoding

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mizuchi_s3::s3::multipart::CompletedPart;
    use mizuchi_s3::s3::{S3Client, S3ClientConfig, S3ClientError};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUCKET: &str = "test-bucket";

    /// Signed client with a fixed region pointing at the mock server
    fn create_test_client(mock_server: &MockServer) -> S3Client {
        let mut config = S3ClientConfig::from_url(&mock_server.uri()).unwrap();
        config.access_key = Some("test-access".to_string());
        config.secret_key = Some("test-secret".to_string());
        config.region = Some("us-east-1".to_string());
        S3Client::new(config).unwrap()
    }

    // ========================================================================
    // TEST: PutObject
    // ========================================================================

    #[tokio::test]
    async fn test_put_object_returns_trimmed_etag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/test-bucket/docs/hello.txt"))
            .and(header("content-type", "text/plain"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"5d41402abc4b2a76b9719d911017c592\"")
                    .insert_header("x-amz-version-id", "v1"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());

        let result = client
            .put_object_bytes(BUCKET, "docs/hello.txt", Bytes::from_static(b"hello"), &headers)
            .await
            .unwrap();

        assert_eq!(result.etag, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(result.version_id.as_deref(), Some("v1"));

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, b"hello");
        assert_eq!(
            requests[0].headers.get("content-length").unwrap().to_str().unwrap(),
            "5"
        );
    }

    #[tokio::test]
    async fn test_key_is_uri_escaped() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/test-bucket/dir/with%20space.txt"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc\""))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client
            .put_object_bytes(BUCKET, "dir/with space.txt", Bytes::new(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result.etag, "abc");
    }

    // ========================================================================
    // TEST: Multipart protocol calls
    // ========================================================================

    #[tokio::test]
    async fn test_initiate_multipart_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("uploads", ""))
            .and(header("x-amz-meta-owner", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <InitiateMultipartUploadResult>
                    <Bucket>test-bucket</Bucket>
                    <Key>large.bin</Key>
                    <UploadId>upload-id-12345</UploadId>
                </InitiateMultipartUploadResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let mut headers = BTreeMap::new();
        headers.insert("X-Amz-Meta-Owner".to_string(), "alice".to_string());

        let upload_id = client
            .initiate_multipart_upload(BUCKET, "large.bin", &headers)
            .await
            .unwrap();
        assert_eq!(upload_id, "upload-id-12345");
    }

    #[tokio::test]
    async fn test_initiate_without_upload_id_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/large.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<InitiateMultipartUploadResult><UploadId></UploadId></InitiateMultipartUploadResult>",
            ))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client
            .initiate_multipart_upload(BUCKET, "large.bin", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(S3ClientError::ResponseError(_))));
    }

    #[tokio::test]
    async fn test_upload_part_sends_content_md5() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("partNumber", "2"))
            .and(query_param("uploadId", "upload-id-12345"))
            .and(header("content-md5", "XUFAKrxLKna5cZ2REBfFkg=="))
            .respond_with(
                ResponseTemplate::new(200).insert_header("ETag", "\"5d41402abc4b2a76b9719d911017c592\""),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let etag = client
            .upload_part(BUCKET, "large.bin", "upload-id-12345", 2, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(etag, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_upload_part_zero_rejected() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server);

        let result = client
            .upload_part(BUCKET, "large.bin", "id", 0, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(S3ClientError::InvalidArgument(_))));
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_sorts_parts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("uploadId", "upload-id-12345"))
            .and(body_string_contains("<PartNumber>1</PartNumber>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <CompleteMultipartUploadResult>
                    <Location>http://localhost/test-bucket/large.bin</Location>
                    <Bucket>test-bucket</Bucket>
                    <Key>large.bin</Key>
                    <ETag>"3858f62230ac3c915f300c664312c11f-2"</ETag>
                </CompleteMultipartUploadResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let parts = vec![CompletedPart::new(2, "etag-2"), CompletedPart::new(1, "etag-1")];
        let completed = client
            .complete_multipart_upload(BUCKET, "large.bin", "upload-id-12345", &parts)
            .await
            .unwrap();
        assert_eq!(completed.etag, "3858f62230ac3c915f300c664312c11f-2");

        let requests = mock_server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let first = body.find("<PartNumber>1</PartNumber>").unwrap();
        let second = body.find("<PartNumber>2</PartNumber>").unwrap();
        assert!(first < second, "parts must be in ascending order: {}", body);
        assert!(body.contains("etag-1"));
    }

    #[tokio::test]
    async fn test_complete_error_embedded_in_200() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("uploadId", "upload-id-12345"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <Error>
                    <Code>InternalError</Code>
                    <Message>We encountered an internal error. Please try again.</Message>
                </Error>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client.region_cache().insert(BUCKET, "us-east-1");

        let err = client
            .complete_multipart_upload(
                BUCKET,
                "large.bin",
                "upload-id-12345",
                &[CompletedPart::new(1, "etag-1")],
            )
            .await
            .unwrap_err();

        let s3_err = err.s3_error().expect("service error");
        assert_eq!(s3_err.code, "InternalError");
        assert_eq!(s3_err.status_code, 200);
        assert_eq!(s3_err.bucket_name.as_deref(), Some(BUCKET));
        assert!(!client.region_cache().contains(BUCKET));
    }

    #[tokio::test]
    async fn test_complete_unknown_document_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/large.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Unexpected/>"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client
            .complete_multipart_upload(BUCKET, "large.bin", "id", &[CompletedPart::new(1, "e")])
            .await;
        assert!(matches!(result, Err(S3ClientError::ResponseError(_))));
    }

    #[tokio::test]
    async fn test_abort_multipart_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("uploadId", "upload-id-12345"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client
            .abort_multipart_upload(BUCKET, "large.bin", "upload-id-12345")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_abort_unknown_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/test-bucket/large.bin"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("x-amz-request-id", "REQ123")
                    .set_body_string(
                        r#"<Error><Code>NoSuchUpload</Code><Message>The specified upload does not exist.</Message><UploadId>gone</UploadId></Error>"#,
                    ),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let err = client
            .abort_multipart_upload(BUCKET, "large.bin", "gone")
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("NoSuchUpload"));
        let s3_err = err.s3_error().unwrap();
        assert_eq!(s3_err.status_code, 404);
        assert_eq!(s3_err.request_id.as_deref(), Some("REQ123"));
        assert_eq!(s3_err.key.as_deref(), Some("large.bin"));
        assert_eq!(s3_err.fields.get("uploadid").map(String::as_str), Some("gone"));
    }

    // ========================================================================
    // TEST: Listings
    // ========================================================================

    #[tokio::test]
    async fn test_list_incomplete_uploads_page() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/test-bucket"))
            .and(query_param("uploads", ""))
            .and(query_param("prefix", "large.bin"))
            .and(query_param("max-uploads", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <ListMultipartUploadsResult>
                    <Bucket>test-bucket</Bucket>
                    <IsTruncated>true</IsTruncated>
                    <NextKeyMarker>large.bin</NextKeyMarker>
                    <NextUploadIdMarker>id-2</NextUploadIdMarker>
                    <Upload>
                        <Key>large.bin</Key>
                        <UploadId>id-1</UploadId>
                        <Initiated>2024-01-01T00:00:00.000Z</Initiated>
                    </Upload>
                    <Upload>
                        <Key>large.bin</Key>
                        <UploadId>id-2</UploadId>
                        <Initiated>2024-01-02T00:00:00.000Z</Initiated>
                    </Upload>
                </ListMultipartUploadsResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let page = client
            .list_incomplete_uploads_page(BUCKET, "large.bin", "", "", "")
            .await
            .unwrap();

        assert!(page.is_truncated);
        assert_eq!(page.next_key_marker, "large.bin");
        assert_eq!(page.next_upload_id_marker, "id-2");
        assert_eq!(page.uploads.len(), 2);
        assert_eq!(page.uploads[1].upload_id, "id-2");
    }

    #[tokio::test]
    async fn test_list_parts_follows_marker() {
        let mock_server = MockServer::start().await;

        // Mounted first so it wins for the second page request
        Mock::given(method("GET"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("uploadId", "upload-id-12345"))
            .and(query_param("part-number-marker", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ListPartsResult>
                    <IsTruncated>false</IsTruncated>
                    <Part><PartNumber>3</PartNumber><ETag>"c"</ETag><Size>1</Size></Part>
                </ListPartsResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/test-bucket/large.bin"))
            .and(query_param("uploadId", "upload-id-12345"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ListPartsResult>
                    <IsTruncated>true</IsTruncated>
                    <NextPartNumberMarker>2</NextPartNumberMarker>
                    <Part><PartNumber>1</PartNumber><ETag>"a"</ETag><Size>5</Size></Part>
                    <Part><PartNumber>2</PartNumber><ETag>"b"</ETag><Size>5</Size></Part>
                </ListPartsResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let parts = client
            .list_parts(BUCKET, "large.bin", "upload-id-12345")
            .await
            .unwrap();

        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parts[0].etag, "a");
        assert_eq!(parts[0].size, 5);
    }

    #[tokio::test]
    async fn test_list_parts_stuck_marker_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/test-bucket/large.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ListPartsResult>
                    <IsTruncated>true</IsTruncated>
                    <NextPartNumberMarker>0</NextPartNumberMarker>
                </ListPartsResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client.list_parts(BUCKET, "large.bin", "id").await;
        assert!(matches!(result, Err(S3ClientError::ResponseError(_))));
    }

    // ========================================================================
    // TEST: Error decoding
    // ========================================================================

    #[tokio::test]
    async fn test_error_without_body_uses_status_table() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/test-bucket/denied.txt"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-amz-id-2", "HOST-ID"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let err = client
            .put_object_bytes(BUCKET, "denied.txt", Bytes::from_static(b"x"), &BTreeMap::new())
            .await
            .unwrap_err();

        let s3_err = err.s3_error().unwrap();
        assert_eq!(s3_err.code, "AccessDenied");
        assert_eq!(s3_err.status_code, 403);
        assert_eq!(s3_err.host_id.as_deref(), Some("HOST-ID"));
        assert_eq!(s3_err.bucket_name.as_deref(), Some(BUCKET));
        assert_eq!(s3_err.resource.as_deref(), Some("/test-bucket/denied.txt"));
    }

    #[tokio::test]
    async fn test_error_document_fields() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/test-bucket/missing.txt"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <Error>
                    <Code>NoSuchBucket</Code>
                    <Message>The specified bucket does not exist</Message>
                    <BucketName>test-bucket</BucketName>
                    <RequestId>REQ</RequestId>
                    <HostId>HOST</HostId>
                </Error>"#,
            ))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client.region_cache().insert(BUCKET, "us-east-1");

        let err = client
            .put_object_bytes(BUCKET, "missing.txt", Bytes::from_static(b"x"), &BTreeMap::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("NoSuchBucket"));
        let s3_err = err.s3_error().unwrap();
        assert_eq!(s3_err.message, "The specified bucket does not exist");
        assert_eq!(s3_err.request_id.as_deref(), Some("REQ"));
        assert_eq!(s3_err.host_id.as_deref(), Some("HOST"));
        assert!(
            !client.region_cache().contains(BUCKET),
            "failed request must invalidate the cached region"
        );
    }
}
