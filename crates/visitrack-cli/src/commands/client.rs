//! Client registry commands for CLI.

use chrono::Utc;
use clap::Subcommand;
use serde_json::json;
use visitrack_core::{format_distance, Client, Config, Database, LocationFix, ProximityEngine};

use super::CmdResult;

#[derive(Subcommand)]
pub enum ClientAction {
    /// Add or update a client
    Add {
        /// Client id
        id: String,
        /// Display name
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Pipeline status, e.g. "lead"
        #[arg(long)]
        status: Option<String>,
    },
    /// List all clients
    List,
    /// Remove a client
    Remove {
        id: String,
    },
    /// Show the nearest client and every client within the proximity radius
    Nearest {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Radius in meters (defaults to proximity.radius_m)
        #[arg(long)]
        radius: Option<f64>,
    },
}

pub fn run(action: ClientAction) -> CmdResult {
    let db = Database::open()?;

    match action {
        ClientAction::Add {
            id,
            name,
            lat,
            lng,
            status,
        } => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(format!("coordinates out of range: {lat}, {lng}").into());
            }
            let client = Client {
                id,
                name,
                latitude: lat,
                longitude: lng,
                status,
            };
            db.upsert_client(&client)?;
            println!("Client saved: {}", client.id);
            println!("{}", serde_json::to_string_pretty(&client)?);
        }
        ClientAction::List => {
            let clients = db.list_clients()?;
            println!("{}", serde_json::to_string_pretty(&clients)?);
        }
        ClientAction::Remove { id } => {
            if !db.delete_client(&id)? {
                return Err(format!("client not found: {id}").into());
            }
            println!("Client removed: {id}");
        }
        ClientAction::Nearest { lat, lng, radius } => {
            let radius = radius.unwrap_or_else(|| Config::load_or_default().proximity.radius_m);
            let entities: Vec<_> = db.list_clients()?.iter().map(Client::trackable).collect();
            let fix = LocationFix::new(lat, lng, Utc::now());
            let engine = ProximityEngine::new();

            let Some((nearest, distance_m)) = engine.nearest(&fix, &entities) else {
                return Err("no clients registered".into());
            };
            let within: Vec<&str> = engine
                .find_all(&fix, &entities, radius)
                .into_iter()
                .map(|e| e.id.as_str())
                .collect();
            let out = json!({
                "nearest": nearest.id,
                "distance_m": distance_m,
                "distance": format_distance(distance_m),
                "radius_m": radius,
                "within_radius": within,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
