//! Wire-format stability tests for serialized plan fragments.

use arrow_schema::{DataType, Field};
use wave_common::{QueryId, StageId, TaskId};
use wave_planner::fragment::{
    DistributionInfo, DistributionMode, ExchangeInfo, ExchangeSource, FragmentNode,
    FragmentNodeBody, HostAddr, PlanFragment, TaskLocator, TaskOutputId,
};
use wave_planner::plan::{Expr, FilterNode, Literal, BinaryOp, ScanNode};
use wave_catalog::TableId;

fn sample_fragment() -> PlanFragment {
    let scan = FragmentNode {
        identity: "Scan { table: orders }".to_string(),
        body: FragmentNodeBody::Scan(ScanNode {
            table_id: TableId(7),
            table_name: "orders".to_string(),
            column_indices: vec![0, 2],
        }),
        children: vec![],
    };
    let filter = FragmentNode {
        identity: "Filter { amount > 10 }".to_string(),
        body: FragmentNodeBody::Filter(FilterNode {
            predicate: Expr::Binary {
                op: BinaryOp::Gt,
                left: Box::new(Expr::InputRef { index: 1 }),
                right: Box::new(Expr::Literal {
                    value: Literal::Int64(10),
                }),
            },
        }),
        children: vec![scan],
    };
    PlanFragment {
        root: filter,
        exchange_info: ExchangeInfo {
            mode: DistributionMode::Hash,
            output_count: 4,
            distribution: Some(DistributionInfo { keys: vec![0] }),
        },
    }
}

#[test]
fn fragment_round_trips_through_json() {
    let fragment = sample_fragment();
    let json = serde_json::to_string(&fragment).unwrap();
    let back: PlanFragment = serde_json::from_str(&json).unwrap();

    assert_eq!(back.exchange_info, fragment.exchange_info);
    assert_eq!(back.root.identity, fragment.root.identity);
    assert_eq!(back.root.children.len(), 1);
    match &back.root.children[0].body {
        FragmentNodeBody::Scan(scan) => {
            assert_eq!(scan.table_name, "orders");
            assert_eq!(scan.column_indices, vec![0, 2]);
        }
        other => panic!("expected scan child, got {other:?}"),
    }
}

#[test]
fn operator_tag_names_are_stable() {
    let json = serde_json::to_value(sample_fragment()).unwrap();
    assert_eq!(json["op"], "filter");
    assert_eq!(json["children"][0]["op"], "scan");
    assert_eq!(json["exchange_info"]["mode"], "hash");
    assert_eq!(json["exchange_info"]["output_count"], 4);
}

#[test]
fn exchange_sources_carry_full_task_addresses() {
    let query_id = QueryId::new();
    let node = FragmentNode {
        identity: "Exchange".to_string(),
        body: FragmentNodeBody::Exchange {
            sources: vec![ExchangeSource {
                task_output_id: TaskOutputId {
                    task: TaskLocator {
                        query_id: query_id.clone(),
                        stage_id: StageId(1),
                        task_id: TaskId(0),
                    },
                    output_id: 2,
                },
                host: HostAddr {
                    host: "10.0.0.5".to_string(),
                    port: 5688,
                },
            }],
            input_schema: vec![Field::new("k", DataType::Int32, true)],
        },
        children: vec![],
    };

    let json = serde_json::to_string(&node).unwrap();
    let back: FragmentNode = serde_json::from_str(&json).unwrap();
    match back.body {
        FragmentNodeBody::Exchange { sources, input_schema } => {
            assert_eq!(sources.len(), 1);
            let src = &sources[0];
            assert_eq!(src.task_output_id.task.query_id, query_id);
            assert_eq!(src.task_output_id.task.stage_id, StageId(1));
            assert_eq!(src.task_output_id.output_id, 2);
            assert_eq!(src.host.to_string(), "10.0.0.5:5688");
            assert_eq!(input_schema[0].name(), "k");
        }
        other => panic!("expected exchange body, got {other:?}"),
    }
}

#[test]
fn singleton_exchange_info_has_no_distribution_detail() {
    let info = ExchangeInfo {
        mode: DistributionMode::Single,
        output_count: 1,
        distribution: None,
    };
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["mode"], "single");
    assert!(json.get("distribution").is_none());
}
