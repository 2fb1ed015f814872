
use actix_web::{
  delete, get, post, rt::signal, web, App, HttpResponse, HttpServer, Responder, Scope,
};
use cinder_kv::{db::Engine, errors::Errors, option::Options};
use std::{collections::HashMap, path::PathBuf, sync::Arc};

#[post("/put")]
pub async fn put_handler(
  eng: web::Data<Arc<Engine>>,
  data: web::Json<HashMap<String, String>>,
) -> impl Responder {
  for (key, val) in data.iter() {
    if eng
      .put(web::Bytes::from(key.clone()), web::Bytes::from(val.clone()))
      .is_err()
    {
      return HttpResponse::InternalServerError().body("failed to put value into engine");
    }
  }
  HttpResponse::Ok().body("OK")
}

#[get("/get/{key}")]
pub async fn get_handler(eng: web::Data<Arc<Engine>>, key: web::Path<String>) -> impl Responder {
  match eng.get(web::Bytes::from(key.to_string())) {
    Ok(val) => HttpResponse::Ok().body(val),
    Err(Errors::KeyNotFound) => HttpResponse::NotFound().body("key not found"),
    Err(_) => HttpResponse::InternalServerError().body("failed to get value from engine"),
  }
}

#[delete("/delete/{key}")]
pub async fn delete_handler(eng: web::Data<Arc<Engine>>, key: web::Path<String>) -> impl Responder {
  if eng.delete(web::Bytes::from(key.to_string())).is_err() {
    return HttpResponse::InternalServerError().body("failed to delete value in engine");
  }
  HttpResponse::Ok().body("OK")
}

#[get("/listkeys")]
pub async fn listkeys_handler(eng: web::Data<Arc<Engine>>) -> impl Responder {
  let keys = match eng.list_keys() {
    Ok(keys) => keys,
    Err(_) => return HttpResponse::InternalServerError().body("failed to list keys"),
  };

  let keys = keys
    .into_iter()
    .map(|key| String::from_utf8_lossy(&key).to_string())
    .collect::<Vec<String>>();
  match serde_json::to_string(&keys) {
    Ok(res) => HttpResponse::Ok()
      .content_type("application/json")
      .body(res),
    Err(_) => HttpResponse::InternalServerError().body("failed to encode keys"),
  }
}

#[get("/stat")]
pub async fn stat_handler(eng: web::Data<Arc<Engine>>) -> impl Responder {
  let stat = match eng.stat() {
    Ok(stat) => stat,
    Err(_) => return HttpResponse::InternalServerError().body("failed to stat engine"),
  };

  let mut res = HashMap::new();
  res.insert("key_count", stat.key_count);
  res.insert("data_file_count", stat.data_file_count);
  res.insert("reclaimable_size", stat.reclaimable_size);
  res.insert("disk_size", stat.disk_size as usize);

  match serde_json::to_string(&res) {
    Ok(body) => HttpResponse::Ok()
      .content_type("application/json")
      .body(body),
    Err(_) => HttpResponse::InternalServerError().body("failed to encode stat"),
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  env_logger::init();

  let engine = Arc::new(
    Engine::open(Options {
      dir_path: PathBuf::from("/tmp/cinder-kv-http"),
      ..Default::default()
    })
    .expect("failed to open the storage engine"),
  );

  let engine_for_server = engine.clone();
  let server = HttpServer::new(move || {
    App::new()
      .app_data(web::Data::new(engine_for_server.clone()))
      .service(
        Scope::new("/cinder-kv")
          .service(put_handler)
          .service(get_handler)
          .service(delete_handler)
          .service(listkeys_handler)
          .service(stat_handler),
      )
  })
  .bind(("127.0.0.1", 8080))?
  .run();

  let server_handle = server.handle();
  actix_web::rt::spawn(async move {
    if signal::ctrl_c().await.is_ok() {
      log::info!("received ctrl-c, shutting down");
      server_handle.stop(true).await;
    }
  });

  server.await?;

  if let Err(e) = engine.close() {
    log::error!("failed to close engine: {e}");
  }

  Ok(())
}
