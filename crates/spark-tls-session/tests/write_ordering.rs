//! 任意长度的连续写入在对端按原顺序拼接还原。

mod support;

use proptest::{collection::vec, prelude::*};
use support::{
    MockProvider, ScriptedChainValidator, default_options, establish, read_plaintext, services,
    session_pair,
};

fn deliver_in_order(writes: Vec<Vec<u8>>, max_plaintext: usize) -> Vec<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("构建测试运行时");
    runtime.block_on(async move {
        let validator = ScriptedChainValidator::default();
        let client_services =
            services(MockProvider::new().with_max_plaintext(max_plaintext), &validator);
        let server_services =
            services(MockProvider::new().with_max_plaintext(max_plaintext), &validator);
        let (client, server) = session_pair(&client_services, &server_services);
        let (client_options, server_options) = default_options("order.example.com");
        let (c, s) = establish(&client, &server, client_options, server_options).await;
        c.expect("客户端握手成功");
        s.expect("服务端握手成功");

        let ctx = spark_tls_session::CallContext::new();
        let total: usize = writes.iter().map(Vec::len).sum();
        for chunk in &writes {
            client.write(&ctx, chunk).await.expect("写入成功");
        }
        read_plaintext(&server, total).await.expect("读取成功")
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn sequential_writes_arrive_concatenated(
        writes in vec(vec(any::<u8>(), 0..200), 1..8),
        max_plaintext in 1usize..96,
    ) {
        let expected: Vec<u8> = writes.concat();
        let received = deliver_in_order(writes, max_plaintext);
        prop_assert_eq!(received, expected);
    }
}
