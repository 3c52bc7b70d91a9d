//! Integration tests for OpenWeatherProvider using wiremock.

use std::{sync::Arc, time::Duration};

use weather_core::{
    DataResult, FixedLocationProvider, OpenWeatherProvider, SqliteWeatherStore, Units,
    WeatherError, WeatherProvider, WeatherRepository, WeatherStore,
    provider::openweather::ClientSettings,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn current_weather(id: i64, name: &str) -> serde_json::Value {
    serde_json::json!({
        "coord": { "lon": 105.84, "lat": 21.02 },
        "weather": [
            { "id": 500, "main": "Rain", "description": "light rain", "icon": "10d" },
            { "id": 701, "main": "Mist", "description": "mist", "icon": "50d" }
        ],
        "base": "stations",
        "main": {
            "temp": 27.5, "feels_like": 30.1, "pressure": 1009,
            "humidity": 83, "temp_min": 27.0, "temp_max": 28.0
        },
        "visibility": 8000,
        "wind": { "speed": 3.6, "deg": 120 },
        "clouds": { "all": 75 },
        "dt": 1_700_000_000,
        "sys": { "type": 1, "id": 9308, "country": "VN", "sunrise": 1_699_998_000, "sunset": 1_700_039_000 },
        "timezone": 25200,
        "id": id,
        "name": name,
        "cod": 200
    })
}

fn provider(server: &MockServer) -> OpenWeatherProvider {
    let settings = ClientSettings { api_key: "TEST_KEY".into(), lang: "en".into(), units: Units::Metric };
    OpenWeatherProvider::with_base_url(&server.uri(), settings, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_by_city_id_sends_settings() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("id", "1581130"))
        .and(query_param("lang", "en"))
        .and(query_param("units", "metric"))
        .and(query_param("appid", "TEST_KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather(1581130, "Hanoi")))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = provider(&server).fetch_by_city_id(1581130).await.unwrap();

    assert_eq!(snapshot.id, 1581130);
    assert_eq!(snapshot.name.as_deref(), Some("Hanoi"));
    assert_eq!(snapshot.conditions.len(), 2);
    assert_eq!(snapshot.conditions[1].main, "Mist");
    assert_eq!(snapshot.sys.as_ref().and_then(|s| s.country.as_deref()), Some("VN"));
}

#[tokio::test]
async fn test_fetch_by_coordinates_sends_lat_lon() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("lat", "21.02"))
        .and(query_param("lon", "105.84"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather(1581130, "Hanoi")))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = provider(&server).fetch_by_coordinates(21.02, 105.84).await.unwrap();
    assert_eq!(snapshot.coord.map(|c| c.lat), Some(21.02));
}

#[tokio::test]
async fn test_fetch_by_city_name_sends_q() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("q", "London"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather(2643743, "London")))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = provider(&server).fetch_by_city_name("  London ").await.unwrap();
    assert_eq!(snapshot.id, 2643743);
}

#[tokio::test]
async fn test_404_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "cod": "404", "message": "city not found"
        })))
        .mount(&server)
        .await;

    let err = provider(&server).fetch_by_city_id(42).await.unwrap_err();
    assert!(matches!(err, WeatherError::NotFound(ref what) if what.contains("42")), "got {err:?}");
}

#[tokio::test]
async fn test_empty_body_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = provider(&server).fetch_by_city_name("Nowhere").await.unwrap_err();
    assert!(matches!(err, WeatherError::NotFound(_)));
}

#[tokio::test]
async fn test_server_error_carries_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let err = provider(&server).fetch_by_city_id(42).await.unwrap_err();
    match err {
        WeatherError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unauthorized_is_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = provider(&server).fetch_by_city_id(42).await.unwrap_err();
    assert!(matches!(err, WeatherError::Api { status: 401, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_is_malformed_data() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"id\": \"not a number\""))
        .mount(&server)
        .await;

    let err = provider(&server).fetch_by_city_id(42).await.unwrap_err();
    assert!(matches!(err, WeatherError::MalformedData(_)));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let settings = ClientSettings { api_key: "K".into(), lang: "en".into(), units: Units::Metric };
    let provider =
        OpenWeatherProvider::with_base_url("http://127.0.0.1:1", settings, Duration::from_secs(2)).unwrap();

    let err = provider.fetch_by_city_id(42).await.unwrap_err();
    assert!(matches!(err, WeatherError::Network(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_settings_swap_applies_to_next_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("lang", "vi"))
        .and(query_param("units", "imperial"))
        .and(query_param("appid", "NEW_KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather(7, "Da Nang")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    provider.set_lang("vi");
    provider.set_units(Units::Imperial);
    provider.set_api_key("NEW_KEY");

    let snapshot = provider.fetch_by_city_id(7).await.unwrap();
    assert_eq!(snapshot.name.as_deref(), Some("Da Nang"));
}

#[tokio::test]
async fn test_repository_refresh_writes_through_to_store() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("lat", "21.02"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather(1581130, "Hanoi")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("id", "99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(SqliteWeatherStore::in_memory().unwrap());
    let repo = WeatherRepository::new(
        store.clone(),
        Arc::new(provider(&server)),
        Arc::new(FixedLocationProvider::new(21.02, 105.84)),
    );

    let snapshot = repo.refresh_current_location().await.ok().expect("refresh must succeed");
    assert_eq!(snapshot.id, 1581130);
    assert_eq!(repo.get_latest().await, DataResult::Success(snapshot.clone()));

    let missing = repo.refresh_by_city_id(99).await;
    assert!(matches!(missing, DataResult::Error(_)));
    assert_eq!(store.get_all_snapshot_ids().unwrap(), vec![1581130]);
    assert_eq!(store.get_snapshot(1581130).unwrap(), Some(snapshot));
}
