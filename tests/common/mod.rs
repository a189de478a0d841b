#![allow(dead_code)]

use gatehouse::transaction::{Apm, ApmEvent, Clock};
use gatehouse::{
    load_spec_str, ApiDocument, AppService, BufferedSink, HandlerRegistry, HandlerResult, HttpError,
    IncomingRequest, Operation, Parameters, RequestBody, Response, RuntimeConfig, SpecFormat,
};
use serde_json::json;
use std::io::Read;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PETSTORE: &str = r##"
openapi: 3.1.0
info:
  title: Gatehouse Fixture
  version: "1.0.0"
servers:
  - url: http://localhost:8080/v1
paths:
  /ping:
    get:
      operationId: getPing
      responses:
        "200":
          description: pong
          content:
            application/json:
              schema:
                type: object
                properties:
                  pong: { type: string }
  /echo:
    put:
      operationId: putEcho
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: "#/components/schemas/Echo"
      responses:
        "200":
          description: echoed
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/Echo"
        "400":
          $ref: "#/components/responses/Error"
  /slow:
    get:
      operationId: getSlow
      parameters:
        - name: delay
          in: query
          required: true
          schema: { type: integer, minimum: 0 }
      responses:
        "200":
          description: done
          content:
            application/json:
              schema: { type: object }
  /pets/mine:
    get:
      operationId: getMyPets
      responses:
        "200":
          description: mine
          content:
            application/json:
              schema: { type: array }
  /pets/{petId}:
    parameters:
      - $ref: "#/components/parameters/PetId"
    get:
      operationId: getPet
      parameters:
        - name: include
          in: query
          schema:
            type: array
            items: { type: string, enum: [owner, vet] }
        - name: X-Request-Tag
          in: header
          schema: { type: string, maxLength: 8 }
      responses:
        "200":
          description: a pet
          content:
            application/json:
              schema: { type: object }
            text/plain:
              schema: { type: string }
        4XX:
          $ref: "#/components/responses/Error"
  /upload:
    post:
      operationId: postUpload
      requestBody:
        content:
          application/octet-stream:
            schema: { type: string, format: binary }
      responses:
        "201":
          description: stored
          content:
            application/json:
              schema: { type: object }
  /download:
    get:
      operationId: getDownload
      responses:
        "200":
          description: raw bytes
          content:
            application/octet-stream:
              schema: { type: string, format: binary }
  /broken/{mode}:
    get:
      operationId: getBroken
      parameters:
        - name: mode
          in: path
          required: true
          schema: { type: string }
      responses:
        "200":
          description: never really
          content:
            application/json:
              schema: { type: object }
  /empty:
    delete:
      operationId: deleteEmpty
      responses:
        "204":
          description: gone
components:
  schemas:
    Echo:
      type: object
      required: [echo]
      properties:
        echo: { type: string }
    Error:
      type: object
      required: [error]
      properties:
        error: { type: string }
        error_description: { type: string }
  parameters:
    PetId:
      name: petId
      in: path
      required: true
      schema: { type: integer, minimum: 1 }
  responses:
    Error:
      description: error
      content:
        application/json:
          schema:
            $ref: "#/components/schemas/Error"
"##;

static MAY_INIT: Once = Once::new();

/// Ensures May coroutines are configured only once
pub fn setup_may_runtime() {
    MAY_INIT.call_once(|| {
        may::config().set_stack_size(0x10000);
    });
}

pub fn document() -> ApiDocument {
    load_spec_str(PETSTORE, SpecFormat::Yaml).unwrap()
}

pub fn handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("getPing", |_: Parameters, _: &Operation| -> HandlerResult {
            Ok(Response::json(200, json!({"pong": "pong"})))
        })
        .register("putEcho", |params: Parameters, _: &Operation| -> HandlerResult {
            let echo = params
                .body()
                .and_then(RequestBody::as_json)
                .and_then(|b| b.get("echo"))
                .and_then(|e| e.as_str())
                .unwrap_or_default()
                .to_string();
            if echo == "Voldemort" {
                return Err(HttpError::custom(
                    400,
                    "E_MUST_NOT_BE_NAMED",
                    "He-who-must-not-be-named cannot be echoed",
                ));
            }
            Ok(Response::json(200, json!({ "echo": echo })))
        })
        .register("getSlow", |params: Parameters, _: &Operation| -> HandlerResult {
            let delay = params.get_i64("delay").unwrap_or(0);
            may::coroutine::sleep(Duration::from_millis(delay.unsigned_abs()));
            Ok(Response::json(200, json!({ "slept": delay })))
        })
        .register("getMyPets", |_: Parameters, _: &Operation| -> HandlerResult {
            Ok(Response::json(200, json!([{"id": 1, "name": "Fluffy"}])))
        })
        .register("getPet", |params: Parameters, _: &Operation| -> HandlerResult {
            let id = params.get_i64("petId").unwrap_or_default();
            if id == 404 {
                return Err(HttpError::custom(404, "E_PET_NOT_FOUND", "no such pet"));
            }
            Ok(Response::json(
                200,
                json!({
                    "id": id,
                    "include": params.get("include").cloned().unwrap_or(json!([])),
                    "tag": params.get_str("xRequestTag"),
                }),
            ))
        })
        .register("postUpload", |mut params: Parameters, _: &Operation| -> HandlerResult {
            let mut size = 0usize;
            if let Some(RequestBody::Stream(mut reader)) = params.take_body() {
                let mut buf = Vec::new();
                size = reader.read_to_end(&mut buf).unwrap_or(0);
            }
            Ok(Response::json(201, json!({ "size": size })))
        })
        .register("getDownload", |_: Parameters, _: &Operation| -> HandlerResult {
            Ok(Response::stream(
                200,
                std::io::Cursor::new(vec![7u8; 20_000]),
            ))
        })
        .register("getBroken", |params: Parameters, _: &Operation| -> HandlerResult {
            match params.get_str("mode") {
                Some("panic") => panic!("handler exploded"),
                Some("zero") => Ok(Response::new(0)),
                Some("invalid") => Ok(Response::new(1000)),
                _ => Ok(Response::json(201, json!({}))),
            }
        })
        .register("deleteEmpty", |_: Parameters, _: &Operation| -> HandlerResult {
            Ok(Response::new(204))
        });
    registry
}

pub fn config() -> RuntimeConfig {
    RuntimeConfig {
        timeout_ms: 2_000,
        ..RuntimeConfig::default()
    }
}

pub fn service_with(config: &RuntimeConfig) -> AppService {
    setup_may_runtime();
    AppService::from_document(&document(), &handlers(), config).unwrap()
}

pub fn service() -> AppService {
    service_with(&config())
}

pub fn call(service: &AppService, request: IncomingRequest) -> BufferedSink {
    let mut sink = BufferedSink::new();
    service.call(request, &mut sink).unwrap();
    sink
}

/// Records every APM event.
#[derive(Default)]
pub struct RecordingApm {
    pub events: Mutex<Vec<ApmEvent>>,
}

impl RecordingApm {
    pub fn events(&self) -> Vec<ApmEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Apm for RecordingApm {
    fn emit(&self, event: &ApmEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Always fails.
pub struct FailingApm;

impl Apm for FailingApm {
    fn emit(&self, _event: &ApmEvent) -> anyhow::Result<()> {
        anyhow::bail!("collector unreachable")
    }
}

/// Returns a fixed instant.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.0)
    }
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
