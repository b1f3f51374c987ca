//! Read-only HTTP JSON API (spec.md §6/§4.11), mirroring
//! `shelter::commands::http::HTTPServerTypeSubCommand::handle`'s
//! `HttpServer::new(...).wrap(Logger)...` shape.

use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer};
use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::Config;
use crate::error::http::HttpApiError;
use crate::records::RecordSet;

const SERVICE_NAME: &str = "cluster-dns-gateway";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize, serde::Deserialize)]
struct VersionResponse {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "URL")]
    url: String,
}

async fn version(config: web::Data<Arc<Config>>) -> HttpResponse {
    HttpResponse::Ok().json(VersionResponse {
        service: SERVICE_NAME.to_string(),
        version: SERVICE_VERSION.to_string(),
        url: format!("http://{}:{}/v1", config.listener, config.http_port),
    })
}

#[derive(Serialize)]
struct ConfigResponse<'a> {
    domain: &'a str,
    listener: String,
    dns_port: u16,
    http_port: u16,
    ttl: u32,
    refresh_seconds: u64,
    masters: &'a [String],
    zk: &'a Option<String>,
    recurse_on: bool,
    external_on: bool,
    dns_on: bool,
    http_on: bool,
}

async fn config_json(config: web::Data<Arc<Config>>) -> HttpResponse {
    HttpResponse::Ok().json(ConfigResponse {
        domain: &config.domain,
        listener: config.listener.to_string(),
        dns_port: config.dns_port,
        http_port: config.http_port,
        ttl: config.ttl,
        refresh_seconds: config.refresh_seconds,
        masters: &config.masters,
        zk: &config.zk,
        recurse_on: config.recurse_on,
        external_on: config.external_on,
        dns_on: config.dns_on,
        http_on: config.http_on,
    })
}

#[derive(Serialize, serde::Deserialize)]
struct HostEntry {
    host: String,
    ip: String,
}

/// `GET /v1/hosts/{host}` — every A answer published under `host`.
async fn hosts(
    live: web::Data<Arc<ArcSwap<RecordSet>>>,
    path: web::Path<String>,
) -> HttpResponse {
    let host = path.into_inner();
    let record_set = live.load();
    let answer = record_set.a.get(&host);

    let mut entries: Vec<HostEntry> = match answer {
        Some(answer) => answer
            .iter()
            .map(|ip| HostEntry {
                host: host.clone(),
                ip: ip.clone(),
            })
            .collect(),
        None => Vec::new(),
    };

    if entries.is_empty() {
        entries.push(HostEntry {
            host: String::new(),
            ip: String::new(),
        });
    }

    HttpResponse::Ok().json(entries)
}

#[derive(Serialize, serde::Deserialize)]
struct ServiceEntry {
    service: String,
    host: String,
    ip: String,
    port: u16,
}

/// `GET /v1/services/{service}` — every SRV answer under `service`, resolved
/// to its glue A record.
async fn services(
    live: web::Data<Arc<ArcSwap<RecordSet>>>,
    path: web::Path<String>,
) -> HttpResponse {
    let service = path.into_inner();
    let record_set = live.load();

    let mut entries: Vec<ServiceEntry> = record_set
        .srv
        .get(&service)
        .map(|answer| {
            answer
                .iter()
                .filter_map(|target| {
                    let (host, port) = target.rsplit_once(':')?;
                    let port: u16 = port.parse().ok()?;
                    let ip = record_set.a.get(host)?.first()?.clone();
                    Some(ServiceEntry {
                        service: service.clone(),
                        host: host.to_string(),
                        ip,
                        port,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if entries.is_empty() {
        entries.push(ServiceEntry {
            service: String::new(),
            host: String::new(),
            ip: String::new(),
            port: 0,
        });
    }

    HttpResponse::Ok().json(entries)
}

/// `GET /v1/hosts/{host}/ports` — never implemented upstream either; kept
/// as an explicit 501 per spec.md §6.
async fn host_ports() -> Result<HttpResponse, HttpApiError> {
    Err(HttpApiError::NotImplemented)
}

/// Starts the JSON API on `config.listener:config.http_port`, reading the
/// same live `RecordSet` the DNS server reads.
pub async fn serve(config: Arc<Config>, live: Arc<ArcSwap<RecordSet>>) -> std::io::Result<()> {
    let addr = (config.listener, config.http_port);
    log::info!("Starting HTTP API on {}:{}", config.listener, config.http_port);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default().log_target("gateway::http"))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(live.clone()))
            .route("/v1/version", web::get().to(version))
            .route("/v1/config", web::get().to(config_json))
            .route("/v1/hosts/{host}", web::get().to(hosts))
            .route("/v1/services/{service}", web::get().to(services))
            .route("/v1/hosts/{host}/ports", web::get().to(host_ports))
    })
    .workers(1)
    .bind(addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostSpecKind, IpSource, SoaConfig};
    use actix_web::test as actix_test;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            domain: "mesos".into(),
            listener: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            dns_port: 53,
            http_port: 8123,
            ttl: 60,
            soa: SoaConfig::default(),
            serial: AtomicU32::new(42),
            refresh_seconds: 60,
            resolvers: Vec::new(),
            masters: vec!["8.8.8.8:9".into()],
            zk: None,
            ip_sources: vec![IpSource::Netinfo, IpSource::Mesos, IpSource::Host],
            host_spec: HostSpecKind::Rfc952,
            recurse_on: true,
            external_on: true,
            dns_on: true,
            http_on: true,
            timeout: Duration::from_secs(5),
            zk_detection_timeout: Duration::from_secs(30),
        })
    }

    fn test_record_set() -> Arc<ArcSwap<RecordSet>> {
        let mut rs = RecordSet::new();
        rs.a.insert("liquor-store.marathon.mesos.", "1.2.3.11");
        rs.srv
            .insert("_liquor-store._tcp.marathon.mesos.", "liquor-store.marathon.mesos.:31000");
        Arc::new(ArcSwap::new(Arc::new(rs)))
    }

    #[actix_web::test]
    async fn version_reports_service_name() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .route("/v1/version", web::get().to(version)),
        )
        .await;
        let req = actix_test::TestRequest::get().uri("/v1/version").to_request();
        let resp: VersionResponse = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.service, SERVICE_NAME.to_string());
    }

    #[actix_web::test]
    async fn hosts_returns_known_a_records() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_record_set()))
                .route("/v1/hosts/{host}", web::get().to(hosts)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/v1/hosts/liquor-store.marathon.mesos.")
            .to_request();
        let resp: Vec<HostEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].ip, "1.2.3.11");
    }

    #[actix_web::test]
    async fn hosts_returns_a_single_empty_entry_for_unknown_host() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_record_set()))
                .route("/v1/hosts/{host}", web::get().to(hosts)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/v1/hosts/nope.mesos.")
            .to_request();
        let resp: Vec<HostEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].host, "");
        assert_eq!(resp[0].ip, "");
    }

    #[actix_web::test]
    async fn services_resolves_srv_target_to_its_glue_a_record() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_record_set()))
                .route("/v1/services/{service}", web::get().to(services)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/v1/services/_liquor-store._tcp.marathon.mesos.")
            .to_request();
        let resp: Vec<ServiceEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].ip, "1.2.3.11");
        assert_eq!(resp[0].port, 31000);
    }

    #[actix_web::test]
    async fn services_returns_a_single_empty_entry_for_unknown_service() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_record_set()))
                .route("/v1/services/{service}", web::get().to(services)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/v1/services/_nope._tcp.marathon.mesos.")
            .to_request();
        let resp: Vec<ServiceEntry> = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].service, "");
        assert_eq!(resp[0].host, "");
        assert_eq!(resp[0].ip, "");
        assert_eq!(resp[0].port, 0);
    }

    #[actix_web::test]
    async fn host_ports_is_not_implemented() {
        let app = actix_test::init_service(
            App::new().route("/v1/hosts/{host}/ports", web::get().to(host_ports)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/v1/hosts/anything/ports")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_IMPLEMENTED);
    }
}
