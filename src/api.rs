//! HTTP routes exposing the bridge, the event stream and permission
//! decisions.

use crate::{
    bridge::{Caller, PortRequest, PortResponse, RequestBridge},
    events::EventSink,
    jsonrpc,
    node::Node,
    permission::{PermissionGate, PermissionRecord, PermissionState},
    signer::router::SigningError,
};
use alloy_primitives::Address;
use rocket::{
    http::Status,
    request::{FromRequest, Outcome, Request},
    response::{
        status::Custom,
        stream::{Event as Sse, EventStream},
        Debug,
    },
    serde::json::Json,
    tokio::{select, sync::broadcast::error::RecvError},
    Route, Shutdown, State,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header carrying the favicon of the requesting page.
const FAVICON_HEADER: &str = "X-Favicon-Url";

/// The request is missing its `Origin` header.
#[derive(Debug)]
pub struct MissingOrigin;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Caller {
    type Error = MissingOrigin;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = request.headers();
        match headers.get_one("Origin") {
            Some(origin) => Outcome::Success(Caller {
                origin: origin.to_owned(),
                favicon_url: headers.get_one(FAVICON_HEADER).map(str::to_owned),
            }),
            None => Outcome::Error((Status::BadRequest, MissingOrigin)),
        }
    }
}

#[rocket::post("/rpc", data = "<request>")]
async fn rpc(
    caller: Caller,
    request: Json<PortRequest>,
    bridge: &State<RequestBridge>,
) -> Json<PortResponse> {
    Json(bridge.handle(&caller, request.into_inner()).await)
}

#[rocket::get("/events")]
fn events(sink: &State<EventSink>, mut shutdown: Shutdown) -> EventStream![] {
    let mut events = sink.subscribe();
    EventStream! {
        loop {
            let event = select! {
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagging");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };
            yield Sse::json(&event);
        }
    }
}

#[rocket::get("/permissions/pending")]
fn pending(gate: &State<Arc<PermissionGate>>) -> Json<Vec<PermissionRecord>> {
    Json(gate.pending_origins())
}

#[derive(Deserialize)]
struct Decision {
    origin: String,
}

#[derive(Serialize)]
struct Resolved {
    resolved: bool,
}

async fn resolve(
    gate: &PermissionGate,
    decision: Decision,
    state: PermissionState,
) -> Result<Json<Resolved>, Debug<anyhow::Error>> {
    let resolved = gate.resolve(&decision.origin, state).await?;
    Ok(Json(Resolved { resolved }))
}

#[rocket::post("/permissions/allow", data = "<decision>")]
async fn allow(
    decision: Json<Decision>,
    gate: &State<Arc<PermissionGate>>,
) -> Result<Json<Resolved>, Debug<anyhow::Error>> {
    resolve(gate, decision.into_inner(), PermissionState::Allow).await
}

#[rocket::post("/permissions/deny", data = "<decision>")]
async fn deny(
    decision: Json<Decision>,
    gate: &State<Arc<PermissionGate>>,
) -> Result<Json<Resolved>, Debug<anyhow::Error>> {
    resolve(gate, decision.into_inner(), PermissionState::Deny).await
}

#[derive(Deserialize)]
struct Account {
    address: Address,
}

#[rocket::post("/accounts/remove", data = "<account>")]
fn remove_account(
    account: Json<Account>,
    node: &State<Arc<Node>>,
) -> Result<Status, Custom<Json<jsonrpc::Error>>> {
    let signing = node.signing();
    let address = account.address;
    signing
        .signing_method(address)
        .ok_or(SigningError::UntrackedAccount(address))
        .and_then(|method| signing.remove_account(address, &method))
        .map(|_| Status::NoContent)
        .map_err(|err| {
            tracing::warn!(%address, %err, "failed to remove account");
            Custom(Status::BadRequest, Json(jsonrpc::Error::from(err)))
        })
}

/// All routes of the API.
pub fn routes() -> Vec<Route> {
    rocket::routes![rpc, events, pending, allow, deny, remove_account]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::remote::Remote,
        permission::store::MemoryStore,
        signer::{router::SigningRouter, SigningMethod},
        testing::{self, MockApproval, MockNonces, MockRouter, MockSigner},
    };
    use rocket::{http::Header, local::asynchronous::Client};
    use serde_json::{json, Value};

    fn node(signer: MockSigner) -> Arc<Node> {
        let signing = SigningRouter::new(
            testing::network(),
            Box::new(MockNonces::default()),
            EventSink::new(),
        )
        .with_keyring(Box::new(signer));
        signing.add_tracked_address(MockSigner::ADDRESS, SigningMethod::Keyring);
        let remote = Remote::new("http://localhost:8545".parse().unwrap()).unwrap();
        Arc::new(Node::new(signing, remote))
    }

    async fn client() -> (Client, Arc<PermissionGate>) {
        let events = EventSink::new();
        let gate = Arc::new(PermissionGate::new(
            Box::new(MemoryStore::default()),
            Box::new(MockApproval::default()),
            events.clone(),
        ));
        let bridge = RequestBridge::new(gate.clone(), Arc::new(MockRouter::default()));
        let rocket = rocket::build()
            .manage(node(MockSigner::default()))
            .manage(bridge)
            .manage(gate.clone())
            .manage(events)
            .mount("/", routes());
        (Client::tracked(rocket).await.unwrap(), gate)
    }

    #[rocket::async_test]
    async fn rpc_requires_origin() {
        let (client, _) = client().await;
        let response = client
            .post("/rpc")
            .json(&json!({ "id": 1, "method": "eth_accounts", "params": [] }))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn permission_round_trip() {
        let (client, gate) = client().await;

        let request = client
            .post("/rpc")
            .header(Header::new("Origin", "https://dapp.example"))
            .json(&json!({ "id": 1, "method": "eth_requestAccounts" }))
            .dispatch();
        let decide = async {
            while gate.waiters("https://dapp.example") == 0 {
                rocket::tokio::task::yield_now().await;
            }
            let pending = client
                .get("/permissions/pending")
                .dispatch()
                .await
                .into_json::<Value>()
                .await
                .unwrap();
            assert_eq!(pending[0]["origin"], json!("https://dapp.example"));

            client
                .post("/permissions/allow")
                .json(&json!({ "origin": "https://dapp.example" }))
                .dispatch()
                .await
                .into_json::<Value>()
                .await
                .unwrap()
        };
        let (response, resolved) = rocket::tokio::join!(request, decide);

        assert_eq!(resolved, json!({ "resolved": true }));
        assert_eq!(
            response.into_json::<Value>().await.unwrap(),
            json!({ "id": 1, "result": [MockSigner::ADDRESS] }),
        );

        let resolved = client
            .post("/permissions/deny")
            .json(&json!({ "origin": "https://dapp.example" }))
            .dispatch()
            .await
            .into_json::<Value>()
            .await
            .unwrap();
        assert_eq!(resolved, json!({ "resolved": false }));
    }

    #[rocket::async_test]
    async fn account_removal() {
        let (client, _) = client().await;
        let account = json!({ "address": MockSigner::ADDRESS });

        let response = client.post("/accounts/remove").json(&account).dispatch().await;
        assert_eq!(response.status(), Status::NoContent);

        // The account is no longer tracked.
        let response = client.post("/accounts/remove").json(&account).dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
        let error = response.into_json::<Value>().await.unwrap();
        assert_eq!(error["code"], json!(4100));
    }
}
