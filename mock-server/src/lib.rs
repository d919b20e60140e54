use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub is_male: bool,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub saldo: f32,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub friends: Vec<Person>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Meta {
    pub success: bool,
    pub error_code: i32,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub user_error_message: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub page_from: i32,
    pub page_to: i32,
    pub number_of_pages: i32,
    pub next_url: Option<String>,
    pub has_more: bool,
}

/// Response schema that nests the payload under `data`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: Meta,
    pub pagination: Pagination,
    pub data: Option<T>,
}

/// What the server saw of a request sent to `/echo`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Deserialize)]
pub struct UpdatePerson {
    pub age: Option<i32>,
    pub saldo: Option<f32>,
}

pub type Db = Arc<RwLock<Vec<Person>>>;

pub fn person(name: &str, age: i32) -> Person {
    Person {
        name: name.to_string(),
        is_male: name == "Marko",
        age,
        saldo: 100.5,
        timestamp: 1_388_534_400,
        friends: Vec::new(),
    }
}

fn seed() -> Vec<Person> {
    let mut marko = person("Marko", 30);
    marko.friends.push(person("Ana", 28));
    vec![marko, person("Ana", 28)]
}

fn page(has_more: bool) -> Pagination {
    Pagination {
        page_from: 1,
        page_to: 1,
        number_of_pages: if has_more { 2 } else { 1 },
        next_url: has_more.then(|| "/custom/persons?page=2".to_string()),
        has_more,
    }
}

fn ok_meta() -> Meta {
    Meta {
        success: true,
        ..Meta::default()
    }
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(seed()));
    Router::new()
        .route("/person", get(get_first_person))
        .route("/persons", get(list_persons).post(create_person))
        .route(
            "/persons/{name}",
            get(get_person).put(update_person).delete(delete_person),
        )
        .route("/empty-list", get(empty_list))
        .route("/custom/person", get(custom_person))
        .route("/custom/persons", get(custom_persons))
        .route("/custom/missing", get(custom_missing))
        .route("/empty", get(empty_body))
        .route("/malformed", get(malformed_body))
        .route("/status/{code}", get(status_code))
        .route("/slow/{millis}", get(slow_person))
        .route("/echo", any(echo))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn get_first_person(State(db): State<Db>) -> Result<Json<Person>, StatusCode> {
    let persons = db.read().await;
    persons.first().cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn list_persons(State(db): State<Db>) -> Json<Vec<Person>> {
    Json(db.read().await.clone())
}

async fn create_person(State(db): State<Db>, Json(input): Json<Person>) -> (StatusCode, Json<Person>) {
    db.write().await.push(input.clone());
    (StatusCode::CREATED, Json(input))
}

async fn get_person(
    State(db): State<Db>,
    Path(name): Path<String>,
) -> Result<Json<Person>, StatusCode> {
    let persons = db.read().await;
    persons
        .iter()
        .find(|p| p.name == name)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_person(
    State(db): State<Db>,
    Path(name): Path<String>,
    Json(input): Json<UpdatePerson>,
) -> Result<Json<Person>, StatusCode> {
    let mut persons = db.write().await;
    let person = persons
        .iter_mut()
        .find(|p| p.name == name)
        .ok_or(StatusCode::NOT_FOUND)?;
    if let Some(age) = input.age {
        person.age = age;
    }
    if let Some(saldo) = input.saldo {
        person.saldo = saldo;
    }
    Ok(Json(person.clone()))
}

async fn delete_person(State(db): State<Db>, Path(name): Path<String>) -> StatusCode {
    let mut persons = db.write().await;
    let before = persons.len();
    persons.retain(|p| p.name != name);
    if persons.len() < before {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn empty_list() -> Json<Vec<Person>> {
    Json(Vec::new())
}

async fn custom_person() -> Json<Envelope<Person>> {
    Json(Envelope {
        meta: ok_meta(),
        pagination: page(false),
        data: Some(person("Marko", 30)),
    })
}

async fn custom_persons(State(db): State<Db>) -> Json<Envelope<Vec<Person>>> {
    Json(Envelope {
        meta: ok_meta(),
        pagination: page(true),
        data: Some(db.read().await.clone()),
    })
}

async fn custom_missing() -> Json<Envelope<Person>> {
    Json(Envelope {
        meta: Meta {
            success: false,
            error_code: 404,
            error_type: Some("NotFound".to_string()),
            error_message: Some("no person for this query".to_string()),
            user_error_message: Some("Nothing found".to_string()),
        },
        pagination: page(false),
        data: None,
    })
}

async fn empty_body() -> (StatusCode, &'static str) {
    (StatusCode::OK, "")
}

async fn malformed_body() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], r#"{"name":"#)
}

async fn status_code(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {}", status.as_u16()))
}

async fn slow_person(Path(millis): Path<u64>) -> Json<Person> {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Json(person("Marko", 30))
}

async fn echo(
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: String,
) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        query,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_serializes_with_snake_case_fields() {
        let json = serde_json::to_value(person("Marko", 30)).unwrap();
        assert_eq!(json["name"], "Marko");
        assert_eq!(json["is_male"], true);
        assert_eq!(json["age"], 30);
        assert!(json["friends"].as_array().unwrap().is_empty());
    }

    #[test]
    fn person_defaults_optional_fields() {
        let input: Person = serde_json::from_str(r#"{"name":"Ivo"}"#).unwrap();
        assert_eq!(input.name, "Ivo");
        assert!(!input.is_male);
        assert!(input.friends.is_empty());
    }

    #[test]
    fn person_rejects_missing_name() {
        let result: Result<Person, _> = serde_json::from_str(r#"{"age":3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn envelope_serializes_siblings_and_data() {
        let envelope = Envelope {
            meta: ok_meta(),
            pagination: page(true),
            data: Some(person("Ana", 28)),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["meta"]["success"], true);
        assert_eq!(json["pagination"]["has_more"], true);
        assert_eq!(json["pagination"]["next_url"], "/custom/persons?page=2");
        assert_eq!(json["data"]["name"], "Ana");
    }

    #[test]
    fn missing_data_serializes_as_null() {
        let envelope: Envelope<Person> = Envelope {
            meta: Meta::default(),
            pagination: page(false),
            data: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["data"].is_null());
    }

    #[test]
    fn update_person_all_fields_optional() {
        let input: UpdatePerson = serde_json::from_str(r#"{}"#).unwrap();
        assert!(input.age.is_none());
        assert!(input.saldo.is_none());
    }
}
