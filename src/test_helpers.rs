//! Messages and a stub upstream server for tests.

use hickory_proto::{
    op::{Message, MessageType, OpCode, Query},
    rr::{rdata::A, Name, RData, Record, RecordType},
};
use std::net::SocketAddr;
use tokio::{net::UdpSocket, task::JoinHandle};

fn example_name() -> Name {
    Name::from_ascii("example.com.").unwrap()
}

/// `example.com A` query with RD set.
pub fn example_query(id: u16) -> Message {
    let mut query = Message::new();
    query
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(example_name(), RecordType::A));
    query
}

/// Answer to `example_query` with one A record. Only QR and RD are set.
pub fn example_reply(id: u16) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(example_name(), RecordType::A))
        .add_answer(Record::from_rdata(example_name(), 300, RData::A(A::new(93, 184, 216, 34))));
    reply
}

/// UDP upstream on localhost. Every received query is answered with the
/// messages `answer` returns, in order, sent as they are.
pub async fn spawn_stub_upstream<F>(answer: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buffer = vec![0u8; 65536];
        loop {
            let (size, from) = match socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(_) => break,
            };
            let query = match Message::from_vec(&buffer[..size]) {
                Ok(query) => query,
                Err(_) => continue,
            };
            for reply in answer(&query) {
                let bytes = reply.to_vec().unwrap();
                let _ = socket.send_to(&bytes, from).await;
            }
        }
    });
    (address, handle)
}
