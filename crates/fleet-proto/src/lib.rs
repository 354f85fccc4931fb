pub mod agent {
    pub mod v1 {
        tonic::include_proto!("fleet.agent.v1");
    }
}
