//! V1_0 connection handshake with SCRAM-SHA-256 authentication.
//!
//! After the 4-byte protocol magic every message in either direction is a
//! JSON object terminated by a NUL byte. The server answers first with its
//! version range, then with the SCRAM server-first message, and finally with
//! its signature, which is checked before the stream is handed back.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

use crate::domain::ports::DatabaseDriverError;

type HmacSha256 = Hmac<Sha256>;

const PROTOCOL_MAGIC: u32 = 0x34c2_bdc3;
const AUTHENTICATION_METHOD: &str = "SCRAM-SHA-256";
/// Base64 of the GS2 header `n,,` sent back in the channel binding field.
const CHANNEL_BINDING: &str = "biws";
const NONCE_BYTES: usize = 18;

/// Client side of one SCRAM-SHA-256 exchange.
pub(crate) struct ScramClient {
    user: String,
    password: String,
    nonce: String,
}

/// Client-final message plus the server signature it commits the server to.
pub(crate) struct ClientFinal {
    pub(crate) message: String,
    server_signature: [u8; 32],
}

impl ScramClient {
    pub(crate) fn new(user: &str, password: &str, nonce: impl Into<String>) -> Self {
        Self {
            user: user.to_owned(),
            password: password.to_owned(),
            nonce: nonce.into(),
        }
    }

    pub(crate) fn with_random_nonce(user: &str, password: &str) -> Self {
        let bytes: [u8; NONCE_BYTES] = rand::thread_rng().r#gen();
        Self::new(user, password, STANDARD.encode(bytes))
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.user), self.nonce)
    }

    pub(crate) fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    /// Answer the server-first message.
    pub(crate) fn client_final(
        &self,
        server_first: &str,
    ) -> Result<ClientFinal, DatabaseDriverError> {
        let challenge = ServerFirst::parse(server_first)?;
        if !challenge.nonce.starts_with(&self.nonce) {
            return Err(DatabaseDriverError::connection(
                "authentication failed: server nonce does not extend the client nonce",
            ));
        }

        let salted =
            salted_password(self.password.as_bytes(), &challenge.salt, challenge.iterations)?;
        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key = to_block(&Sha256::digest(client_key));

        let without_proof = format!("c={CHANNEL_BINDING},r={}", challenge.nonce);
        let auth_message = format!(
            "{},{server_first},{without_proof}",
            self.client_first_bare()
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, signature)| key ^ signature)
            .collect();

        let server_key = hmac(&salted, b"Server Key")?;
        let server_signature = hmac(&server_key, auth_message.as_bytes())?;

        Ok(ClientFinal {
            message: format!("{without_proof},p={}", STANDARD.encode(proof)),
            server_signature,
        })
    }
}

impl ClientFinal {
    /// Check the server-final `v=` attribute against the expected signature.
    pub(crate) fn verify(&self, server_final: &str) -> Result<(), DatabaseDriverError> {
        let encoded = attribute(server_final, 'v').ok_or_else(|| {
            DatabaseDriverError::connection("authentication failed: missing server signature")
        })?;
        let received = STANDARD.decode(encoded).map_err(|_| {
            DatabaseDriverError::connection("authentication failed: malformed server signature")
        })?;
        if received != self.server_signature {
            return Err(DatabaseDriverError::connection(
                "authentication failed: server signature mismatch",
            ));
        }
        Ok(())
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl ServerFirst {
    fn parse(message: &str) -> Result<Self, DatabaseDriverError> {
        let malformed = || {
            DatabaseDriverError::connection(format!(
                "authentication failed: malformed server challenge `{message}`"
            ))
        };
        let nonce = attribute(message, 'r').ok_or_else(malformed)?;
        let salt = attribute(message, 's')
            .and_then(|salt| STANDARD.decode(salt).ok())
            .ok_or_else(malformed)?;
        let iterations = attribute(message, 'i')
            .and_then(|count| count.parse::<u32>().ok())
            .filter(|count| *count > 0)
            .ok_or_else(malformed)?;
        Ok(Self {
            nonce: nonce.to_owned(),
            salt,
            iterations,
        })
    }
}

fn attribute(message: &str, name: char) -> Option<&str> {
    message.split(',').find_map(|part| {
        part.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

fn hmac(key: &[u8], message: &[u8]) -> Result<[u8; 32], DatabaseDriverError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|error| DatabaseDriverError::connection(format!("invalid HMAC key: {error}")))?;
    mac.update(message);
    Ok(to_block(&mac.finalize().into_bytes()))
}

fn to_block(bytes: &[u8]) -> [u8; 32] {
    let mut block = [0_u8; 32];
    block.copy_from_slice(bytes);
    block
}

/// PBKDF2-HMAC-SHA256 truncated to a single 32-byte block.
fn salted_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<[u8; 32], DatabaseDriverError> {
    let mut first_input = salt.to_vec();
    first_input.extend_from_slice(&1_u32.to_be_bytes());
    let mut block = hmac(password, &first_input)?;
    let mut result = block;
    for _ in 1..iterations {
        block = hmac(password, &block)?;
        for (acc, byte) in result.iter_mut().zip(block.iter()) {
            *acc ^= byte;
        }
    }
    Ok(result)
}

#[derive(Serialize)]
struct ClientFirstMessage<'a> {
    protocol_version: u32,
    authentication_method: &'a str,
    authentication: &'a str,
}

#[derive(Serialize)]
struct ClientFinalMessage<'a> {
    authentication: &'a str,
}

#[derive(Deserialize)]
struct ServerMessage {
    success: bool,
    #[serde(default)]
    authentication: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    server_version: Option<String>,
}

/// Authenticate over `stream` and return it ready for queries.
pub(crate) async fn handshake<S>(stream: S, scram: &ScramClient) -> Result<S, DatabaseDriverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufStream::new(stream);

    stream
        .write_all(&PROTOCOL_MAGIC.to_le_bytes())
        .await
        .map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    let version = read_message(&mut stream).await?;
    debug!(server_version = version.server_version.as_deref(), "server accepted protocol");

    let client_first = scram.client_first();
    write_message(
        &mut stream,
        &ClientFirstMessage {
            protocol_version: 0,
            authentication_method: AUTHENTICATION_METHOD,
            authentication: &client_first,
        },
    )
    .await?;

    let server_first = authentication_of(read_message(&mut stream).await?)?;
    let client_final = scram.client_final(&server_first)?;
    write_message(
        &mut stream,
        &ClientFinalMessage {
            authentication: &client_final.message,
        },
    )
    .await?;

    let server_final = authentication_of(read_message(&mut stream).await?)?;
    client_final.verify(&server_final)?;

    Ok(stream.into_inner())
}

async fn write_message<S, M>(
    stream: &mut BufStream<S>,
    message: &M,
) -> Result<(), DatabaseDriverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    let mut bytes = serde_json::to_vec(message).map_err(|error| {
        DatabaseDriverError::connection(format!("failed to encode handshake: {error}"))
    })?;
    bytes.push(0);
    stream.write_all(&bytes).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)
}

async fn read_message<S>(stream: &mut BufStream<S>) -> Result<ServerMessage, DatabaseDriverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut bytes = Vec::new();
    stream.read_until(0, &mut bytes).await.map_err(io_error)?;
    if bytes.pop() != Some(0) {
        return Err(DatabaseDriverError::connection(
            "server closed the connection during the handshake",
        ));
    }
    let message: ServerMessage = serde_json::from_slice(&bytes).map_err(|_| {
        DatabaseDriverError::connection(format!(
            "unexpected handshake reply: {}",
            String::from_utf8_lossy(&bytes)
        ))
    })?;
    if !message.success {
        let reason = message.error.as_deref().unwrap_or("handshake rejected");
        return Err(DatabaseDriverError::connection(reason.to_owned()));
    }
    Ok(message)
}

fn authentication_of(message: ServerMessage) -> Result<String, DatabaseDriverError> {
    message
        .authentication
        .ok_or_else(|| DatabaseDriverError::connection("handshake reply lacks authentication data"))
}

fn io_error(error: std::io::Error) -> DatabaseDriverError {
    DatabaseDriverError::connection(error.to_string())
}

#[cfg(test)]
mod tests {
    //! SCRAM derivation against RFC 7677 and a scripted handshake.

    use rstest::{fixture, rstest};
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, BufReader, duplex};

    use super::*;

    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str = concat!(
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,",
        "s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
    );
    const CLIENT_FINAL: &str = concat!(
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,",
        "p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=",
    );
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[fixture]
    fn scram() -> ScramClient {
        ScramClient::new("user", "pencil", CLIENT_NONCE)
    }

    #[rstest]
    fn client_first_carries_user_and_nonce(scram: ScramClient) {
        assert_eq!(scram.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
    }

    #[rstest]
    fn client_proof_matches_the_published_vector(scram: ScramClient) {
        let client_final = scram.client_final(SERVER_FIRST).expect("challenge should parse");

        assert_eq!(client_final.message, CLIENT_FINAL);
        client_final
            .verify(SERVER_FINAL)
            .expect("server signature should verify");
    }

    #[rstest]
    fn forged_server_signature_is_rejected(scram: ScramClient) {
        let client_final = scram.client_final(SERVER_FIRST).expect("challenge should parse");

        let result = client_final.verify("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");

        assert!(matches!(result, Err(DatabaseDriverError::Connection { .. })));
    }

    #[rstest]
    fn foreign_server_nonce_is_rejected(scram: ScramClient) {
        let result = scram.client_final("r=somebodyElse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096");

        assert!(matches!(result, Err(DatabaseDriverError::Connection { .. })));
    }

    #[rstest]
    fn usernames_are_escaped() {
        let scram = ScramClient::new("a=b,c", "", "n");

        assert_eq!(scram.client_first(), "n,,n=a=3Db=2Cc,r=n");
    }

    async fn read_json<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Value {
        let mut bytes = Vec::new();
        reader.read_until(0, &mut bytes).await.expect("read message");
        bytes.pop();
        serde_json::from_slice(&bytes).expect("client sends JSON")
    }

    async fn reply<W: AsyncWriteExt + Unpin>(writer: &mut W, message: Value) {
        let mut bytes = message.to_string().into_bytes();
        bytes.push(0);
        writer.write_all(&bytes).await.expect("write reply");
    }

    #[rstest]
    #[tokio::test]
    async fn handshake_completes_against_a_scripted_server(scram: ScramClient) {
        let (client, server) = duplex(4096);
        let server = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut magic = [0_u8; 4];
            server.read_exact(&mut magic).await.expect("read magic");
            assert_eq!(u32::from_le_bytes(magic), PROTOCOL_MAGIC);
            reply(
                server.get_mut(),
                json!({
                    "success": true,
                    "min_protocol_version": 0,
                    "max_protocol_version": 0,
                    "server_version": "2.4.4"
                }),
            )
            .await;

            let first = read_json(&mut server).await;
            assert_eq!(first["authentication_method"], "SCRAM-SHA-256");
            assert_eq!(first["authentication"], "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
            reply(server.get_mut(), json!({"success": true, "authentication": SERVER_FIRST})).await;

            let last = read_json(&mut server).await;
            assert_eq!(last["authentication"], CLIENT_FINAL);
            reply(server.get_mut(), json!({"success": true, "authentication": SERVER_FINAL})).await;
        });

        handshake(client, &scram).await.expect("handshake should succeed");
        server.await.expect("scripted server should finish");
    }

    #[rstest]
    #[tokio::test]
    async fn rejected_credentials_are_connection_errors(scram: ScramClient) {
        let (client, server) = duplex(4096);
        let server = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut magic = [0_u8; 4];
            server.read_exact(&mut magic).await.expect("read magic");
            reply(server.get_mut(), json!({"success": true, "server_version": "2.4.4"})).await;
            read_json(&mut server).await;
            reply(
                server.get_mut(),
                json!({"success": false, "error": "Wrong password", "error_code": 12}),
            )
            .await;
        });

        let result = handshake(client, &scram).await;

        assert_eq!(result.err(), Some(DatabaseDriverError::connection("Wrong password")));
        server.await.expect("scripted server should finish");
    }
}
