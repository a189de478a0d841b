use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gatehouse::{
    load_spec_str, HandlerRegistry, HandlerResult, IncomingRequest, Operation, OperationResolver,
    Parameters, Response, Router, RuntimeConfig, SpecFormat,
};
use http::Method;
use serde_json::json;

fn verb_zoo() -> &'static str {
    r#"openapi: 3.1.0
info:
  title: Verb Zoo
  version: "1.0.0"
servers:
  - url: /api
paths:
  "/":
    get:
      operationId: root_handler
      responses:
        "200": { description: OK }
  /zoo/animals:
    get:
      operationId: get_animals
      responses:
        "200": { description: OK }
    post:
      operationId: create_animal
      responses:
        "200": { description: OK }
  /zoo/animals/{id}:
    get:
      operationId: get_animal
      responses:
        "200": { description: OK }
    delete:
      operationId: delete_animal
      responses:
        "200": { description: OK }
  /zoo/animals/{id}/toys/{toy_id}:
    get:
      operationId: animal_toy
      responses:
        "200": { description: OK }
  /zoo/{category}/animals/{id}/habitats/{habitat_id}/sections/{section_id}:
    get:
      operationId: habitat_section
      responses:
        "200": { description: OK }
  /inventory/{warehouse_id}/feeds/{feed_id}/items/{item_id}/batches/{batch_id}:
    post:
      operationId: post_item_batch
      responses:
        "200": { description: OK }
  /complex/{a}/{b}/{c}/{d}/{e}/{f}/{g}/{h}/{i}:
    get:
      operationId: complex_many_params
      responses:
        "200": { description: OK }
  /ping:
    get:
      operationId: get_ping
      parameters:
        - name: verbose
          in: query
          schema: { type: boolean }
      responses:
        "200":
          description: pong
          content:
            application/json:
              schema: { type: object }
"#
}

fn bench_resolve(c: &mut Criterion) {
    let document = load_spec_str(verb_zoo(), SpecFormat::Yaml).expect("fixture loads");
    let resolver =
        OperationResolver::new(&document.base_path, &document.operations).expect("no collisions");
    c.bench_function("resolve", |b| {
        let paths = [
            (Method::GET, "/api/zoo/animals/123"),
            (Method::GET, "/api/zoo/animals/123/toys/456"),
            (Method::GET, "/api/zoo/cats/animals/123/habitats/88/sections/5"),
            (Method::POST, "/api/inventory/1/feeds/2/items/3/batches/4"),
            (Method::GET, "/api/complex/1/2/3/4/5/6/7/8/9"),
            (Method::GET, "/api/nowhere"),
        ];
        b.iter(|| {
            for (method, path) in &paths {
                black_box(resolver.resolve(method, path));
            }
        })
    });
}

fn bench_handle(c: &mut Criterion) {
    let document = load_spec_str(verb_zoo(), SpecFormat::Yaml).expect("fixture loads");
    let mut handlers = HandlerRegistry::new();
    for operation in &document.operations {
        handlers.register(
            operation.operation_id.clone(),
            |_: Parameters, _: &Operation| -> HandlerResult {
                Ok(Response::json(200, json!({"ok": true})))
            },
        );
    }
    let router = Router::new(&document, &handlers, &RuntimeConfig::default()).expect("router");
    c.bench_function("handle_ping", |b| {
        b.iter(|| {
            let request = IncomingRequest::new(Method::GET, "/api/ping?verbose=true")
                .header("accept", "application/json");
            black_box(router.handle(request))
        })
    });
}

criterion_group!(benches, bench_resolve, bench_handle);
criterion_main!(benches);
