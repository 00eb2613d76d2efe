// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow};
use mesa_app::{
    DataQuery, DataService, GroupByParam, GroupService, SortDirection, SubGroupLookup,
};
use mesa_client::Client;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::Read;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

fn json_response(body: &str, status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(status)
        .with_header(
            Header::from_bytes("Content-Type", "application/json")
                .expect("valid content type header"),
        )
}

fn read_body(request: &mut tiny_http::Request) -> Value {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .expect("request body should be readable");
    serde_json::from_str(&body).expect("request body should be JSON")
}

fn header(request: &tiny_http::Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(name))
        .map(|header| header.value.as_str().to_owned())
}

#[test]
fn unreachable_server_error_names_the_config_key() {
    let client = Client::new("http://127.0.0.1:1", "rechazos", Duration::from_millis(50))
        .expect("client should initialize");

    let error = client
        .ping()
        .expect_err("ping should fail for unreachable endpoint");
    let message = error.to_string();
    assert!(message.contains("server.base_url"));
}

#[test]
fn get_data_posts_camel_case_query() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/api", server.server_addr());

    let handle = thread::spawn(move || {
        let mut request = server.recv().expect("request expected");
        assert_eq!(*request.method(), Method::Post);
        assert_eq!(request.url(), "/api/rechazos/query");
        assert_eq!(
            header(&request, "Authorization").as_deref(),
            Some("Bearer secreto")
        );

        let body = read_body(&mut request);
        assert_eq!(body["page"], json!(2));
        assert_eq!(body["pageSize"], json!(20));
        assert_eq!(body["searchTerm"], json!("acme"));
        assert_eq!(body["sortColumn"], json!("importe"));
        assert_eq!(body["sortDirection"], json!("desc"));
        assert_eq!(
            body["groupBy"],
            json!({"field": "idEquipoVenta", "value": "3"})
        );
        assert_eq!(body["filters"], json!({"activo": true}));

        let response = json_response(
            r#"{"items":[{"id":21,"cliente":"Acme"}],"totalItems":21}"#,
            200,
        );
        request.respond(response).expect("response should succeed");
    });

    let client = Client::new(&addr, "rechazos", Duration::from_secs(1))?
        .with_token(Some("secreto".to_owned()));
    let mut filters = BTreeMap::new();
    filters.insert("activo".to_owned(), json!(true));
    let page = client.get_data(&DataQuery {
        filters,
        search_term: "acme".to_owned(),
        page: 2,
        page_size: 20,
        sort_column: Some("importe".to_owned()),
        sort_direction: Some(SortDirection::Desc),
        group_by: Some(GroupByParam {
            field: "idEquipoVenta".to_owned(),
            value: "3".to_owned(),
        }),
    })?;

    assert_eq!(page.total_items, 21);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].get("cliente"), Some(&json!("Acme")));

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn grouping_endpoints_use_expected_paths() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("options request expected");
        assert_eq!(*request.method(), Method::Get);
        assert_eq!(request.url(), "/group-by/options/rechazos-venta");
        let response = json_response(
            r#"[{"id":"1","name":"Equipos","field":"idEquipoVenta","endpoint":"incentive-team",
                "hideField":"equipo"}]"#,
            200,
        );
        request.respond(response).expect("response should succeed");

        let mut request = server.recv().expect("values request expected");
        assert_eq!(request.url(), "/group-by/incentive-team/values");
        let body = read_body(&mut request);
        assert_eq!(body["searchTerm"], json!("nor"));
        let response = json_response(r#"[{"id":7,"name":"Norte"},{"id":null}]"#, 200);
        request.respond(response).expect("response should succeed");

        let request = server.recv().expect("sub-group request expected");
        assert_eq!(request.url(), "/group-by/team-incentives/7");
        let response = json_response(r#"[{"id":"2","name":"Captación"}]"#, 200);
        request.respond(response).expect("response should succeed");
    });

    let client = Client::new(&addr, "rechazos", Duration::from_secs(1))?;
    let options = client.group_options("rechazos-venta")?;
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].hide_field.as_deref(), Some("equipo"));

    let values = client.group_values("incentive-team", &BTreeMap::new(), "nor")?;
    assert_eq!(values[0].id.as_deref(), Some("7"));
    assert_eq!(values[0].name.as_deref(), Some("Norte"));
    assert_eq!(values[1].id, None);

    let subs = client.sub_groups(SubGroupLookup::TeamIncentives, "7", &BTreeMap::new(), "")?;
    assert_eq!(subs[0].name.as_deref(), Some("Captación"));

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn server_error_message_is_surfaced() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        let response = json_response(r#"{"message":"entity rechazos not found"}"#, 404);
        request.respond(response).expect("response should succeed");
    });

    let client = Client::new(&addr, "rechazos", Duration::from_secs(1))?;
    let error = client
        .group_options("rechazos")
        .expect_err("404 should fail");
    let message = format!("{error:#}");
    assert!(message.contains("grouping options for rechazos"));
    assert!(message.contains("server error (404): entity rechazos not found"));

    handle.join().expect("server thread should join");
    Ok(())
}
