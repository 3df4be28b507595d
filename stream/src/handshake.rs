//! Establish session keys over a freshly opened connection.
//!
//! Both sides send their nonce before reading the peer's, so the exchange cannot deadlock on
//! transports without buffering. The server (decrypting half) verifies the client's
//! Diffie-Hellman parameter before generating and sending its own.

use crate::{
    keys::{self, Parameter, ParameterKeys, SessionKeys, PARAMETER_LENGTH},
    Config, Error, Role, NONCE_LENGTH,
};
use futures::try_join;
use rand::{CryptoRng, RngCore};
use spiped_cryptography::{
    dh::{PrivateKey, PublicKey, SharedValue},
    SharedSecret,
};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

/// Run the handshake over `socket`, returning the keys for both directions.
pub async fn handshake<S, R>(
    socket: &mut S,
    config: &Config,
    secret: &SharedSecret,
    rng: &mut R,
) -> Result<SessionKeys, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: RngCore + CryptoRng,
{
    // Exchange nonces
    let mut local_nonce = [0u8; NONCE_LENGTH];
    rng.fill_bytes(&mut local_nonce);
    let mut remote_nonce = [0u8; NONCE_LENGTH];
    {
        let (mut reader, mut writer) = tokio::io::split(&mut *socket);
        let write = async {
            writer.write_all(&local_nonce).await?;
            writer.flush().await
        };
        let read = reader.read_exact(&mut remote_nonce);
        try_join!(
            async { write.await.map_err(Error::SendFailed) },
            async { read.await.map_err(Error::RecvFailed) },
        )?;
    }
    let parameter_keys =
        keys::derive_parameter_keys(secret, &local_nonce, &remote_nonce, config.role);

    // Exchange Diffie-Hellman parameters
    let (private, remote) = match config.role {
        Role::Encrypt => {
            let (private, parameter) = generate(config, &parameter_keys, rng);
            send(socket, &parameter).await?;
            let parameter = recv(socket).await?;
            let remote =
                keys::verify_parameter(&parameter, parameter_keys.remote(), config.require_pfs)?;
            (private, remote)
        }
        Role::Decrypt => {
            let parameter = recv(socket).await?;
            let remote =
                keys::verify_parameter(&parameter, parameter_keys.remote(), config.require_pfs)?;
            let (private, parameter) = generate(config, &parameter_keys, rng);
            send(socket, &parameter).await?;
            (private, remote)
        }
    };

    // Derive session keys
    let shared = match private {
        Some(private) => private.agree(&remote),
        None => SharedValue::identity(),
    };
    Ok(keys::derive_session_keys(
        secret,
        &local_nonce,
        &remote_nonce,
        &shared,
        config.role,
    ))
}

/// Create this side's parameter. Without forward secrecy no exponent is generated and the
/// identity is sent instead.
fn generate<R: RngCore + CryptoRng>(
    config: &Config,
    keys: &ParameterKeys,
    rng: &mut R,
) -> (Option<PrivateKey>, Parameter) {
    let private = (!config.no_pfs).then(|| PrivateKey::generate(rng));
    let public = private
        .as_ref()
        .map_or_else(PublicKey::identity, PrivateKey::public_key);
    let parameter = keys::sign_parameter(public.as_bytes(), keys.local());
    (private, parameter)
}

async fn send<S: AsyncWrite + Unpin>(socket: &mut S, parameter: &Parameter) -> Result<(), Error> {
    socket
        .write_all(parameter)
        .await
        .map_err(Error::SendFailed)?;
    socket.flush().await.map_err(Error::SendFailed)
}

async fn recv<S: AsyncRead + Unpin>(socket: &mut S) -> Result<Parameter, Error> {
    let mut parameter = [0u8; PARAMETER_LENGTH];
    socket
        .read_exact(&mut parameter)
        .await
        .map_err(Error::RecvFailed)?;
    Ok(parameter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{packet::KeySet, FRAME_SIZE};
    use rand::{rngs::StdRng, SeedableRng};
    use test_case::test_case;
    use tokio::io::{duplex, DuplexStream};

    fn secret() -> SharedSecret {
        SharedSecret::from_bytes(b"handshake test key")
    }

    /// Run the handshake on one end of a duplex, closing it afterwards so that a failure on
    /// one side unblocks the other.
    async fn run(
        mut socket: DuplexStream,
        config: Config,
        secret: SharedSecret,
        seed: u64,
    ) -> Result<SessionKeys, Error> {
        let mut rng = StdRng::seed_from_u64(seed);
        let result = handshake(&mut socket, &config, &secret, &mut rng).await;
        drop(socket);
        result
    }

    async fn pair(
        client: Config,
        server: Config,
        client_secret: SharedSecret,
        server_secret: SharedSecret,
    ) -> (Result<SessionKeys, Error>, Result<SessionKeys, Error>) {
        let (a, b) = duplex(FRAME_SIZE);
        tokio::join!(
            run(a, client, client_secret, 0),
            run(b, server, server_secret, 1)
        )
    }

    fn assert_linked(sender: &mut KeySet, receiver: &mut KeySet) {
        let mut frame = sender.encrypt(b"linked").unwrap();
        assert_eq!(receiver.decrypt(&mut frame).unwrap(), b"linked");
    }

    fn assert_session(client: Result<SessionKeys, Error>, server: Result<SessionKeys, Error>) {
        let mut client = client.unwrap();
        let mut server = server.unwrap();
        assert_linked(&mut client.client, &mut server.client);
        assert_linked(&mut server.server, &mut client.server);
    }

    #[tokio::test]
    async fn test_handshake() {
        let (client, server) = pair(
            Config::new(Role::Encrypt),
            Config::new(Role::Decrypt),
            secret(),
            secret(),
        )
        .await;
        assert_session(client, server);
    }

    #[tokio::test]
    async fn test_handshake_deterministic() {
        let mut frames = Vec::new();
        for _ in 0..2 {
            let (client, server) = pair(
                Config::new(Role::Encrypt),
                Config::new(Role::Decrypt),
                secret(),
                secret(),
            )
            .await;
            let mut run = Vec::new();
            for mut keys in [client.unwrap(), server.unwrap()] {
                run.push(keys.client.encrypt(b"repeat").unwrap());
                run.push(keys.server.encrypt(b"repeat").unwrap());
            }
            frames.push(run);
        }
        assert_eq!(frames[0], frames[1]);

        // Both ends of a run hold the same client and server keys.
        assert_eq!(frames[0][0], frames[0][2]);
        assert_eq!(frames[0][1], frames[0][3]);
        assert_ne!(frames[0][0], frames[0][1]);
    }

    #[test_case(true, false; "client waives")]
    #[test_case(false, true; "server waives")]
    #[test_case(true, true; "both waive")]
    #[tokio::test]
    async fn test_waive_pfs(client_waives: bool, server_waives: bool) {
        let mut client = Config::new(Role::Encrypt);
        client.no_pfs = client_waives;
        let mut server = Config::new(Role::Decrypt);
        server.no_pfs = server_waives;
        let (client, server) = pair(client, server, secret(), secret()).await;
        assert_session(client, server);
    }

    #[tokio::test]
    async fn test_server_requires_pfs() {
        let mut client = Config::new(Role::Encrypt);
        client.no_pfs = true;
        let mut server = Config::new(Role::Decrypt);
        server.require_pfs = true;
        let (client, server) = pair(client, server, secret(), secret()).await;

        // The server rejects before sending its parameter, so the client sees the close.
        assert!(matches!(server, Err(Error::ForwardSecrecyRequired)));
        assert!(matches!(client, Err(Error::RecvFailed(_))));
    }

    #[tokio::test]
    async fn test_client_requires_pfs() {
        let mut client = Config::new(Role::Encrypt);
        client.require_pfs = true;
        let mut server = Config::new(Role::Decrypt);
        server.no_pfs = true;
        let (client, server) = pair(client, server, secret(), secret()).await;
        assert!(matches!(client, Err(Error::ForwardSecrecyRequired)));
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_both_require_pfs() {
        let mut client = Config::new(Role::Encrypt);
        client.require_pfs = true;
        let mut server = Config::new(Role::Decrypt);
        server.require_pfs = true;
        let (client, server) = pair(client, server, secret(), secret()).await;
        assert_session(client, server);
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let (client, server) = pair(
            Config::new(Role::Encrypt),
            Config::new(Role::Decrypt),
            secret(),
            SharedSecret::from_bytes(b"some other key"),
        )
        .await;
        assert!(matches!(server, Err(Error::InvalidParameterMac)));
        assert!(matches!(client, Err(Error::RecvFailed(_))));
    }

    #[tokio::test]
    async fn test_same_role() {
        // Two clients each wait for the other's parameter, and each rejects the other's tag
        // because both used the client key.
        let (client, server) = pair(
            Config::new(Role::Encrypt),
            Config::new(Role::Encrypt),
            secret(),
            secret(),
        )
        .await;
        assert!(matches!(client, Err(Error::InvalidParameterMac)));
        assert!(matches!(server, Err(Error::InvalidParameterMac)));
    }

    #[tokio::test]
    async fn test_peer_closes_during_nonce() {
        let (mut a, mut b) = duplex(FRAME_SIZE);
        b.write_all(&[0u8; NONCE_LENGTH - 1]).await.unwrap();
        drop(b);
        let mut rng = StdRng::seed_from_u64(0);
        let result = handshake(&mut a, &Config::new(Role::Decrypt), &secret(), &mut rng).await;
        assert!(matches!(
            result,
            Err(Error::RecvFailed(_) | Error::SendFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreduced_parameter() {
        // Act as a client that sends a correctly tagged but out-of-range public value.
        let secret = secret();
        let (mut a, mut b) = duplex(FRAME_SIZE);
        let peer = async {
            let nonce = [7u8; NONCE_LENGTH];
            b.write_all(&nonce).await.unwrap();
            let mut remote = [0u8; NONCE_LENGTH];
            b.read_exact(&mut remote).await.unwrap();
            let keys = keys::derive_parameter_keys(&secret, &nonce, &remote, Role::Encrypt);
            let parameter = keys::sign_parameter(&[0xff; 256], keys.local());
            b.write_all(&parameter).await.unwrap();
        };
        let mut rng = StdRng::seed_from_u64(0);
        let config = Config::new(Role::Decrypt);
        let (result, _) = tokio::join!(handshake(&mut a, &config, &secret, &mut rng), peer);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_transcript_length() {
        // A client sees exactly one nonce and one parameter from the server.
        let (a, mut b) = duplex(4 * FRAME_SIZE);
        let client = run(a, Config::new(Role::Encrypt), secret(), 0);
        let server = async {
            let mut rng = StdRng::seed_from_u64(1);
            let keys = handshake(&mut b, &Config::new(Role::Decrypt), &secret(), &mut rng).await;
            (keys, b)
        };
        let (client, (server, mut b)) = tokio::join!(client, server);
        assert_session(client, server);

        // The client dropped its end, so nothing else is buffered.
        let mut rest = Vec::new();
        b.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
