//! Demo client: fetches one user, then streams the whole directory.

use clap::Parser;
use tokio_stream::StreamExt;
use tonic::{Request, codec::CompressionEncoding, metadata::MetadataValue, transport::Channel};
use tonic_views_proto::{Empty, GetPayload, TestServiceClient};

#[derive(Debug, Parser)]
#[command(version, about = "Calls the demo user directory")]
struct ClientArgs {
    /// Server URL.
    #[arg(long, env = "SERVER_URL", default_value_t = String::from("http://127.0.0.1:55000"))]
    server_url: String,

    /// User id passed to GetUser.
    #[arg(long, default_value_t = 1)]
    id: i32,

    /// JSON principal sent as `user` metadata, e.g. '{"id": 10, "username": "jace"}'.
    #[arg(long)]
    user: Option<String>,
}

fn with_principal<T>(message: T, principal: Option<&str>) -> anyhow::Result<Request<T>> {
    let mut request = Request::new(message);
    if let Some(raw) = principal {
        request
            .metadata_mut()
            .insert("user", MetadataValue::try_from(raw)?);
    }
    Ok(request)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = ClientArgs::parse();

    let channel = Channel::from_shared(args.server_url)?.connect().await?;
    let mut client = TestServiceClient::new(channel)
        .send_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Zstd);

    println!("Calling GetUser with id = {}", args.id);
    let request = with_principal(GetPayload { id: args.id }, args.user.as_deref())?;
    match client.get_user(request).await {
        Ok(response) => println!("Received response for GetUser: {:?}", response.into_inner()),
        Err(status) => println!("GetUser failed: {:?} {}", status.code(), status.message()),
    }

    println!("Calling ListUsers");
    let request = with_principal(Empty {}, args.user.as_deref())?;
    let mut stream = client.list_users(request).await?.into_inner();
    while let Some(user) = stream.next().await {
        match user {
            Ok(user) => println!("{user:?}"),
            Err(status) => {
                println!("ListUsers failed: {:?} {}", status.code(), status.message());
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_local_server() {
        let args = ClientArgs::try_parse_from(["tonic-views-client"]).unwrap();
        assert_eq!(args.server_url, "http://127.0.0.1:55000");
        assert_eq!(args.id, 1);
        assert!(args.user.is_none());
    }

    #[test]
    fn principal_travels_as_user_metadata() {
        let raw = r#"{"id": 10, "username": "jace"}"#;
        let request = with_principal(GetPayload { id: 2 }, Some(raw)).unwrap();
        assert_eq!(request.metadata().get("user").unwrap(), raw);

        let anonymous = with_principal(Empty {}, None).unwrap();
        assert!(anonymous.metadata().get("user").is_none());
    }
}
